use std::path::PathBuf;

use clap::Parser;

#[derive(Parser)]
#[command(
    name = "snapmerge",
    version,
    about = "Reconcile Snapchat export media files against merged chat history"
)]
struct Cli {
    /// Directory of per-conversation folders (conversation.json inside each)
    #[arg(long)]
    conversations: PathBuf,

    /// Directory of group-conversation folders
    #[arg(long)]
    groups: PathBuf,

    /// Flat directory of exported media files
    #[arg(long)]
    media: PathBuf,

    /// Output directory for mapping.json
    #[arg(short, long)]
    output: PathBuf,

    /// Maximum timestamp distance for matching videos, in seconds
    #[arg(long, default_value_t = 10)]
    threshold: u32,

    /// Disable parallel scanning and matching
    #[arg(long)]
    sequential: bool,

    /// Disable the ffprobe fallback for timestamp extraction
    #[arg(long)]
    no_probe: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let t_total = std::time::Instant::now();

    let options = snapmerge_core::ReconcileOptions {
        conversations_dir: cli.conversations,
        groups_dir: cli.groups,
        media_dir: cli.media,
        output: cli.output,
        threshold_secs: cli.threshold,
        parallel: !cli.sequential,
        probe_fallback: !cli.no_probe,
    };

    let stats = snapmerge_core::run(&options, &|stage, current, total, message| {
        eprintln!("\r[{}] {}/{} {}", stage, current + 1, total, message);
    })?;

    eprintln!(
        "Done! {}/{} media IDs mapped ({:.1}%), {} unmatched, {} orphaned files, \
         {}/{} videos matched by timestamp ({:.2}s)",
        stats.ids_mapped,
        stats.unique_ids,
        stats.mapping_rate,
        stats.ids_unmapped,
        stats.orphaned_files,
        stats.videos_matched,
        stats.videos_processed,
        t_total.elapsed().as_secs_f64()
    );

    Ok(())
}
