use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use terramesh::{build_and_carve, export, run_streaming, Database, PointIndex, Ray};

const DEFAULT_MIN_MERGE_DISTANCE: f64 = 0.01;

/// Reconstruct a terrain mesh from raycast hit/miss logs.
#[derive(Parser)]
#[command(name = "terramesh", author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to the point/ray database.
    #[arg(long = "db", default_value = "terramesh.db", global = true)]
    db: PathBuf,

    /// Path to the raycast log to tail. Defaults to a file in the
    /// system temp directory when omitted.
    #[arg(long = "log", global = true)]
    log: Option<PathBuf>,

    /// Output mesh path. A `.glb` extension selects glTF-binary;
    /// anything else selects Wavefront OBJ.
    #[arg(long = "out", default_value = "terramesh.glb", global = true)]
    out: PathBuf,

    /// Disable log ingestion entirely.
    #[arg(long = "nolog", global = true)]
    nolog: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest the log, build the mesh, and export it. Default when no
    /// subcommand is given.
    Run,
    /// Ingest the log and persist the database; skip mesh export.
    Update,
    /// Merge two databases' points and rays into a third.
    Merge { a: PathBuf, b: PathBuf, out: PathBuf },
}

fn default_log_path() -> PathBuf {
    std::env::temp_dir().join("terramesh.log")
}

fn install_ctrlc_handler() -> Arc<AtomicBool> {
    let cancel = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&cancel);
    if let Err(e) = ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    }) {
        log::warn!("failed to install Ctrl-C handler: {e}");
    }
    cancel
}

fn export_mesh(index: &PointIndex, rays: &[Ray], out_path: &Path) -> terramesh::Result<()> {
    let triangles = build_and_carve(index.points(), rays);
    let file = std::fs::File::create(out_path)?;
    let is_glb = out_path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("glb"))
        .unwrap_or(false);

    if is_glb {
        export::write_glb(index.points(), &triangles, file)?;
    } else {
        export::write_obj(index.points(), &triangles, file)?;
    }
    println!(
        "wrote {} ({} triangles) to {}",
        if is_glb { "GLB" } else { "OBJ" },
        triangles.iter().filter(|t| !t.is_deleted()).count(),
        out_path.display()
    );
    Ok(())
}

fn run_command(cli: &Cli, build_and_export: bool) -> terramesh::Result<()> {
    if cli.nolog {
        println!("logging disabled (-nolog); nothing to ingest");
        return Ok(());
    }

    let log_path = cli.log.clone().unwrap_or_else(default_log_path);
    println!("tailing {} (Ctrl-C to stop)", log_path.display());

    let cancel = install_ctrlc_handler();
    let out_path = cli.out.clone();

    let stats = if build_and_export {
        let mut export_fn = |index: &PointIndex, rays: &[Ray]| export_mesh(index, rays, &out_path);
        run_streaming(
            &log_path,
            &cli.db,
            DEFAULT_MIN_MERGE_DISTANCE,
            &cancel,
            Some(&mut export_fn),
        )?
    } else {
        run_streaming(&log_path, &cli.db, DEFAULT_MIN_MERGE_DISTANCE, &cancel, None)?
    };

    println!(
        "processed {} lines, {} points, {} rays, {} save(s)",
        stats.processed_lines, stats.points_accepted, stats.rays_recorded, stats.saves
    );
    Ok(())
}

fn merge_command(a: &Path, b: &Path, out: &Path) -> terramesh::Result<()> {
    let db_a = Database::load(a)?;
    let db_b = Database::load(b)?;
    let merged = terramesh::db::merge(DEFAULT_MIN_MERGE_DISTANCE, db_a, db_b);
    let point_count = merged.points.len();
    let ray_count = merged.rays.len();
    merged.save(out)?;
    println!(
        "merged {point_count} points and {ray_count} rays into {}",
        out.display()
    );
    Ok(())
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    let command = cli.command.as_ref().unwrap_or(&Command::Run);

    let result = match command {
        Command::Run => run_command(&cli, true),
        Command::Update => run_command(&cli, false),
        Command::Merge { a, b, out } => merge_command(a, b, out),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
