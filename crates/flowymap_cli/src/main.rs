//! CLI smoke and maintenance entry point.
//!
//! # Responsibility
//! - Verify `flowymap_core` linkage (`ping`, `version`).
//! - Inspect, export and import the map stored in a SQLite file.

use clap::{Parser, Subcommand};
use flowymap_core::{
    open_db, Connection, ImportSource, MapSession, SessionConfig, SqliteKvStore, SystemClock,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;
use std::time::SystemTime;

#[derive(Parser, Debug)]
#[command(name = "flowymap")]
#[command(version, about = "Inspect and exchange flowymap task maps")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Check that the core library links
    Ping,
    /// Print the core library version
    Version,
    /// Print node/edge counts and milestone progress of a stored map
    Summary {
        /// SQLite storage file
        db: PathBuf,
    },
    /// Write the stored map as a .flowymap file
    Export {
        /// SQLite storage file
        db: PathBuf,
        /// Directory that receives the export
        dir: PathBuf,
    },
    /// Replace the stored map with a .flowymap or .json file
    Import {
        /// SQLite storage file
        db: PathBuf,
        /// Map file to load
        file: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Ping => {
            println!("flowymap_core ping={}", flowymap_core::ping());
            Ok(())
        }
        Command::Version => {
            println!("flowymap_core version={}", flowymap_core::core_version());
            Ok(())
        }
        Command::Summary { db } => summary(&db),
        Command::Export { db, dir } => export(&db, &dir),
        Command::Import { db, file } => import(&db, &file),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}

fn summary(db: &Path) -> Result<(), String> {
    let conn = open_db(db).map_err(|err| err.to_string())?;
    let session = open_session(&conn);
    let store = session.store();
    println!("nodes={} edges={}", store.nodes().len(), store.edges().len());
    for progress in session.all_progress() {
        println!(
            "milestone={} completed={} total={} percent={}",
            progress.milestone_id,
            progress.completed,
            progress.total,
            progress.percent()
        );
    }
    session.close();
    Ok(())
}

fn export(db: &Path, dir: &Path) -> Result<(), String> {
    let conn = open_db(db).map_err(|err| err.to_string())?;
    let mut session = open_session(&conn);
    let artifact = session
        .export(SystemTime::now())
        .map_err(|err| err.to_string())?;
    let path = artifact
        .write_to_dir(dir)
        .map_err(|err| format!("failed to write export: {err}"))?;
    println!("exported={}", path.display());
    session.close();
    Ok(())
}

fn import(db: &Path, file: &Path) -> Result<(), String> {
    let conn = open_db(db).map_err(|err| err.to_string())?;
    let mut session = open_session(&conn);
    let source = ImportSource::from_path(file).map_err(|err| err.to_string())?;
    let summary = session.import(&source).map_err(|err| err.to_string())?;
    session
        .persistence()
        .save_now(&session.store().snapshot())
        .map_err(|err| err.to_string())?;
    println!("imported nodes={} edges={}", summary.nodes, summary.edges);
    session.close();
    Ok(())
}

fn open_session(conn: &Connection) -> MapSession<SqliteKvStore<'_>> {
    MapSession::open(
        SqliteKvStore::new(conn),
        Rc::new(SystemClock),
        SessionConfig::default(),
    )
}
