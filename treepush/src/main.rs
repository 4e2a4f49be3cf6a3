use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::instrument;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "treepush",
    version,
    about = "Push a local file or directory tree to a remote host over SSH",
    long_about = "`treepush` copies a local file or directory tree into a directory on a remote host.

The remote side only needs an SSH server and an `scp` binary: the tree is streamed into `scp -tr <destination>` using the classic copy protocol. Authentication is by password, which is usually a one-time code issued by a platform control plane.

EXAMPLES:
    # Push ./site into /home/vcap on an application instance
    TREEPUSH_PASSWORD=... treepush --endpoint ssh.example.com:2222 --user cf:<app-guid>/0 ./site

    # Push a single file into a different directory and show what was sent
    treepush --endpoint 10.0.0.5:22 --user deploy --destination /srv/app --summary ./config.yml"
)]
struct Args {
    // Connection
    /// Remote SSH endpoint
    #[arg(long, value_name = "HOST:PORT", help_heading = "Connection")]
    endpoint: String,

    /// User name to authenticate as
    #[arg(long, value_name = "USER", help_heading = "Connection")]
    user: String,

    /// Password to authenticate with
    #[arg(
        long,
        env = "TREEPUSH_PASSWORD",
        hide_env_values = true,
        value_name = "PASSWORD",
        help_heading = "Connection"
    )]
    password: String,

    /// Expected SHA-256 fingerprint of the server host key
    ///
    /// Base64 as printed by `ssh-keygen -l`, with or without the `SHA256:` prefix. When not given any host key is accepted.
    #[arg(long, value_name = "FINGERPRINT", help_heading = "Connection")]
    host_key_fingerprint: Option<String>,

    // Copy options
    /// Directory on the remote host that receives the tree
    #[arg(
        long,
        default_value = remote::session::DEFAULT_DESTINATION,
        value_name = "DIR",
        help_heading = "Copy options"
    )]
    destination: String,

    /// Program started on the remote host to receive the tree
    #[arg(
        long,
        default_value = "scp",
        value_name = "PROGRAM",
        help_heading = "Copy options"
    )]
    scp_program: String,

    /// Follow symbolic links in the local tree instead of failing on them
    #[arg(short = 'L', long, help_heading = "Copy options")]
    dereference: bool,

    // Progress & output
    /// Print summary at the end
    #[arg(long, help_heading = "Progress & output")]
    summary: bool,

    /// Verbose level (implies "summary"): -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", help_heading = "Progress & output")]
    quiet: bool,

    // Advanced settings
    /// Size of the buffer used to stream file contents
    #[arg(
        long,
        default_value = "64KiB",
        value_name = "SIZE",
        help_heading = "Advanced settings"
    )]
    chunk_size: bytesize::ByteSize,

    /// Number of worker threads (0 = number of CPU cores)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_workers: usize,

    /// Number of blocking worker threads (0 = Tokio default of 512)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_blocking_threads: usize,

    // ARGUMENTS
    /// Local file or directory to push
    #[arg()]
    path: PathBuf,
}

/// Tags a library error with its class so users can tell where it happened.
fn classify<E>(class: common::ErrorClass, error: E) -> anyhow::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    anyhow::Error::new(error).context(format!("{class} error"))
}

#[instrument(skip_all)]
async fn async_main(args: Args) -> anyhow::Result<common::Summary> {
    if args.chunk_size.as_u64() == 0 {
        return Err(anyhow::anyhow!("--chunk-size must be greater than zero"));
    }
    let tree_settings = common::filetree::Settings {
        dereference: args.dereference,
    };
    let root = common::build(&args.path, &tree_settings)
        .await
        .map_err(|error| classify(error.class(), error))
        .with_context(|| format!("failed to read {:?}", args.path))?;
    let planned = root.summary();
    tracing::info!(
        "pushing {} files and {} directories ({})",
        planned.files_sent,
        planned.directories_sent,
        bytesize::ByteSize(planned.bytes_sent)
    );
    let settings = remote::Settings {
        destination: args.destination.clone(),
        scp_program: args.scp_program.clone(),
        chunk_size: usize::try_from(args.chunk_size.as_u64()).unwrap_or(usize::MAX),
    };
    let connector = remote::SshConnector::new(remote::SshConfig {
        host_key_fingerprint: args.host_key_fingerprint.clone(),
    });
    let mut session = remote::Session::new(connector, settings);
    session
        .connect(&args.endpoint, &args.user, &args.password)
        .await
        .map_err(|error| classify(error.class(), error))?;
    let result = session
        .send(Arc::new(root))
        .await
        .map_err(|error| classify(error.class(), error))
        .with_context(|| {
            format!(
                "failed to push {:?} to {}:{}",
                args.path, args.endpoint, args.destination
            )
        });
    if let Err(error) = session.close().await {
        tracing::warn!("failed to close connection: {error:#}");
    }
    result
}

fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        print_summary: args.summary,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
        max_blocking_threads: args.max_blocking_threads,
    };
    let res = common::run(output, runtime, || async_main(args));
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
