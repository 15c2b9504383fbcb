use log_tail::{Config, LineKind, SeekInfo, WatchService, tail_file};
use std::sync::Arc;
use tokio_stream::StreamExt;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        eprintln!("Usage: shared_service <log file>...");
        std::process::exit(1);
    }

    // One native watcher for every tailed file
    let service = Arc::new(WatchService::new()?);

    let mut tasks = Vec::new();
    for path in paths {
        let config = Config::default()
            .with_follow(true)
            .with_reopen(true)
            .with_location(SeekInfo::end())
            .with_watch_service(Arc::clone(&service));
        let mut tail = tail_file(&path, config).await?;

        tasks.push(tokio::spawn(async move {
            while let Some(line) = tail.next().await {
                match line.kind {
                    LineKind::NewLine => println!("{}: {}", path, line.text),
                    LineKind::NewFile => println!("{}: reopened", path),
                    LineKind::Ticker => {}
                }
            }
            if let Err(e) = tail.wait().await {
                eprintln!("{}: {}", path, e);
            }
        }));
    }

    tokio::signal::ctrl_c().await?;
    service.shutdown();
    for task in tasks {
        task.abort();
    }

    Ok(())
}
