use std::{error::Error, path::Path};

use clap::Parser;
use log::{error, info};
use rki_etl::db::{prod_db::ProdDb, rki::landkreis_archive::LoadOutcome};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Environment name, e.g., test, prod
    #[arg(short, long, default_value = "prod")]
    env: String,
}

/// Run this job once a day, after the RKI dashboard update
fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    dotenvy::from_path(Path::new(format!(".env/{}.env", args.env).as_str()))?;

    let archive = ProdDb::rki_landkreis()?;
    match archive.run(&archive.feature_service())? {
        LoadOutcome::Appended { id_request, rows } => {
            info!("Request {}: {} rows were appended", id_request, rows)
        }
        LoadOutcome::ErrorLogged { id_request, cause } => {
            error!("Request {}: data not appended, {}", id_request, cause)
        }
    }

    Ok(())
}
