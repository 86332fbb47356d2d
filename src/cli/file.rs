//! Guest file transfer commands.

use crate::cli::parsers::read_input;
use crate::cli::{print_json, Context};
use clap::Args;
use qga_protocol::encode_payload;
use serde_json::json;
use std::io::Write;
use std::path::PathBuf;

/// Print a file from the guest
#[derive(Args, Debug)]
pub struct FileReadCmd {
    /// File path in the guest
    pub path: String,

    /// Write the contents to this local file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl FileReadCmd {
    pub fn run(self, ctx: &Context) -> qgactl::Result<()> {
        let data = ctx.agent().read_file(&self.path)?;

        if let Some(output) = &self.output {
            std::fs::write(output, &data)?;
            eprintln!("Read {} bytes from {}", data.len(), self.path);
            return Ok(());
        }

        if ctx.json {
            let content = match std::str::from_utf8(&data) {
                Ok(text) => json!(text),
                Err(_) => json!({ "base64": encode_payload(&data) }),
            };
            return print_json(&json!({ "path": self.path, "count": data.len(), "content": content }));
        }

        std::io::stdout().write_all(&data)?;
        Ok(())
    }
}

/// Write a file in the guest, replacing its contents
#[derive(Args, Debug)]
pub struct FileWriteCmd {
    /// File path in the guest
    pub path: String,

    /// Content to write; read from --input or stdin when omitted
    #[arg(conflicts_with = "input")]
    pub content: Option<String>,

    /// Local file to upload ("-" for stdin)
    #[arg(short, long)]
    pub input: Option<PathBuf>,
}

impl FileWriteCmd {
    pub fn run(self, ctx: &Context) -> qgactl::Result<()> {
        let data = match (self.content, &self.input) {
            (Some(content), _) => content.into_bytes(),
            (None, Some(input)) => read_input(input)?,
            (None, None) => read_input(std::path::Path::new("-"))?,
        };

        ctx.agent().write_file(&self.path, &data)?;

        if ctx.json {
            print_json(&json!({ "path": self.path, "count": data.len() }))
        } else {
            println!("Wrote {} bytes to {}", data.len(), self.path);
            Ok(())
        }
    }
}
