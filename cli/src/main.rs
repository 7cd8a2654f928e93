use std::io::Read;
use std::path::{Path, PathBuf};
use std::process;

use structopt::StructOpt;

use ewsmail::{Attachment, Client, Config, Email};

#[derive(Debug, StructOpt)]
#[structopt(name = "ewsmail", about = "Send mail through Exchange Web Services.")]
struct Opt {
    /// Config file (TOML), merged with EWSMAIL_* environment variables.
    #[structopt(short, long)]
    config: Option<String>,

    #[structopt(short, long)]
    to: Vec<String>,

    #[structopt(long)]
    cc: Vec<String>,

    #[structopt(long)]
    bcc: Vec<String>,

    #[structopt(short, long)]
    subject: String,

    /// Attach a file; may be repeated.
    #[structopt(short, long, parse(from_os_str))]
    attach: Vec<PathBuf>,
}

fn guess_content_type(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    let mime = match ext.as_str() {
        "txt" => "text/plain",
        "htm" | "html" => "text/html",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "zip" => "application/zip",
        _ => return None,
    };
    Some(mime.to_string())
}

fn load_attachment(path: &Path) -> std::io::Result<Attachment> {
    let data = std::fs::read(path)?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("attachment")
        .to_string();

    Ok(Attachment {
        name,
        content_type: guess_content_type(path),
        data,
        ..Default::default()
    })
}

#[tokio::main]
async fn main() {
    // Init logger
    env_logger::builder().format_timestamp_micros().init();

    let opt = Opt::from_args();

    let config = match Config::load(opt.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            process::exit(1);
        }
    };

    // Message body comes from stdin
    let mut body = String::new();
    if let Err(e) = std::io::stdin().read_to_string(&mut body) {
        log::error!("Failed to read message body from stdin: {}", e);
        process::exit(1);
    }

    let mut attachments = Vec::new();
    for path in &opt.attach {
        match load_attachment(path) {
            Ok(attachment) => attachments.push(attachment),
            Err(e) => {
                log::error!("Failed to read attachment {:?}: {}", path, e);
                process::exit(1);
            }
        }
    }

    let mail = Email {
        to: opt.to,
        cc: opt.cc,
        bcc: opt.bcc,
        subject: opt.subject,
        body,
        attachments,
    };

    let client = match Client::new(config) {
        Ok(client) => client,
        Err(e) => {
            log::error!("{}", e);
            process::exit(1);
        }
    };

    match client.send_mail(mail).await {
        Ok(resp) => {
            let status = resp.status();
            log::info!("EWS responded with {}", status);

            match resp.text().await {
                Ok(text) => println!("{}", text),
                Err(e) => {
                    log::error!("Failed to read response body: {}", e);
                    process::exit(1);
                }
            }

            if !status.is_success() {
                process::exit(1);
            }
        }
        Err(e) => {
            log::error!("Failed to send mail: {}", e);
            process::exit(1);
        }
    }
}
