//! Manual sync command.

use wayfarer::DataEngine;

use crate::error::CliError;

/// Drain pending writes and pull remote changes.
pub async fn run(engine: &DataEngine) -> Result<(), CliError> {
    if !engine.monitor().is_online() {
        println!("Offline - pending writes will sync when connectivity returns.");
        return Ok(());
    }

    let report = engine.ledger().sync().await?;
    println!("{}", report);
    println!("{} favorites after refresh", engine.ledger().list().len());

    Ok(())
}
