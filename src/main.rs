use log_tail::{Config, LineKind, SeekInfo, tail_file};
use std::env;
use std::process;
use tokio_stream::StreamExt;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "Usage: {} [-f] [-F] [--poll] [--end] <file_path>";

fn init_logging() {
    let filter = env::var("LOG_TAIL_LOG")
        .ok()
        .and_then(|level| EnvFilter::try_new(level).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn parse_args(args: &[String]) -> Option<(String, Config)> {
    let mut config = Config::default().with_location(SeekInfo::start());
    let mut file_path = None;

    for arg in args.iter().skip(1) {
        match arg.as_str() {
            "-f" => config.follow = true,
            "-F" => {
                config.follow = true;
                config.reopen = true;
            }
            "--poll" => config.poll = true,
            "--end" => config.location = Some(SeekInfo::end()),
            other if other.starts_with('-') => return None,
            other => {
                if file_path.replace(other.to_string()).is_some() {
                    return None;
                }
            }
        }
    }

    file_path.map(|path| (path, config))
}

#[tokio::main]
async fn main() {
    init_logging();

    let args: Vec<String> = env::args().collect();
    let Some((file_path, config)) = parse_args(&args) else {
        let program = args.first().map(String::as_str).unwrap_or("log-tail");
        eprintln!("{}", USAGE.replace("{}", program));
        process::exit(1);
    };

    match tail_file(&file_path, config).await {
        Ok(mut tail) => {
            while let Some(line) = tail.next().await {
                match (line.kind, line.err) {
                    (LineKind::NewLine, Some(e)) => eprintln!("{}: {}", file_path, e),
                    (LineKind::NewLine, None) => println!("{}", line.text),
                    (LineKind::NewFile | LineKind::Ticker, _) => {}
                }
            }
            if let Err(e) = tail.wait().await {
                eprintln!("Error reading file: {}", e);
                process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("Error setting up tail: {}", e);
            process::exit(1);
        }
    }
}
