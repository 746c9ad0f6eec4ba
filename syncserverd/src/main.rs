use std::path::PathBuf;

use syncserverd::config::ClientConfig;
use syncserverd::daemon::{self, DaemonRuntime, UploadArgs};
use syncserverd::logging::init_logging;

const USAGE: &str = "\
Usage: syncserverd [COMMAND]

Commands:
  run                                   Upload every queued batch (default)
  status                                Print the master version and queued work
  enqueue-upload <uuid> <mime> <path>   Queue a file upload
      [--app-meta-data <text>] [--undelete]
  enqueue-delete <uuid>                 Queue a server-side deletion
  --help, -h                            Show this help";

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliMode {
    Run,
    Status,
    EnqueueUpload(UploadArgs),
    EnqueueDelete(String),
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter().skip(1);
    let Some(command) = args.next() else {
        return Ok(CliMode::Run);
    };
    let mode = match command.as_str() {
        "run" => CliMode::Run,
        "status" => CliMode::Status,
        "--help" | "-h" => CliMode::Help,
        "enqueue-delete" => {
            let file_uuid = args
                .next()
                .ok_or_else(|| anyhow::anyhow!("enqueue-delete needs a file uuid"))?;
            CliMode::EnqueueDelete(file_uuid)
        }
        "enqueue-upload" => {
            let mut positional = Vec::new();
            let mut app_meta_data = None;
            let mut undelete = false;
            while let Some(arg) = args.next() {
                match arg.as_str() {
                    "--undelete" => undelete = true,
                    "--app-meta-data" => {
                        app_meta_data = Some(args.next().ok_or_else(|| {
                            anyhow::anyhow!("--app-meta-data needs a value")
                        })?);
                    }
                    flag if flag.starts_with("--") => anyhow::bail!("unknown option: {flag}"),
                    _ => positional.push(arg),
                }
            }
            let [file_uuid, mime_type, path]: [String; 3] = positional
                .try_into()
                .map_err(|_| anyhow::anyhow!("enqueue-upload needs <uuid> <mime> <path>"))?;
            return Ok(CliMode::EnqueueUpload(UploadArgs {
                file_uuid,
                mime_type,
                path: PathBuf::from(path),
                app_meta_data,
                undelete,
            }));
        }
        other => anyhow::bail!("unknown argument: {other}"),
    };
    if let Some(extra) = args.next() {
        anyhow::bail!("unexpected argument: {extra}");
    }
    Ok(mode)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let mode = parse_cli_mode(std::env::args())?;
    if mode == CliMode::Help {
        println!("{USAGE}");
        return Ok(());
    }

    let config = ClientConfig::from_env()?;
    init_logging(config.log_format)?;

    match mode {
        CliMode::Run => {
            let summary = DaemonRuntime::bootstrap(config).await?.run().await?;
            println!(
                "uploaded {} file(s) and {} deletion(s) in {} batch(es)",
                summary.files_uploaded, summary.deletions_uploaded, summary.batches_finalized
            );
        }
        CliMode::Status => {
            let store = daemon::open_store(&config).await?;
            print!("{}", daemon::status_report(&store).await?);
        }
        CliMode::EnqueueUpload(args) => {
            let store = daemon::open_store(&config).await?;
            let queue_id = daemon::enqueue_upload(&store, args).await?;
            println!("queued upload in queue {queue_id}");
        }
        CliMode::EnqueueDelete(file_uuid) => {
            let store = daemon::open_store(&config).await?;
            let queue_id = daemon::enqueue_delete(&store, &file_uuid).await?;
            println!("queued deletion in queue {queue_id}");
        }
        CliMode::Help => {}
    }
    Ok(())
}
