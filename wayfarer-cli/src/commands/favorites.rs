//! Favorite location commands.

use clap::Subcommand;
use wayfarer::ledger::{FavoriteLocation, SyncState};
use wayfarer::DataEngine;

use crate::error::CliError;

/// Favorites subcommands.
#[derive(Debug, Subcommand)]
pub enum FavoritesAction {
    /// Save a favorite location
    Add {
        /// Display name
        name: String,
        /// Latitude in degrees
        #[arg(long)]
        lat: f64,
        /// Longitude in degrees
        #[arg(long)]
        lon: f64,
        /// Street address
        #[arg(long, default_value = "")]
        address: String,
        /// Record id; defaults to a slug of the name
        #[arg(long)]
        id: Option<String>,
    },
    /// List saved favorites
    List,
    /// Remove a favorite by id
    Remove { id: String },
}

/// Run a favorites subcommand.
pub async fn run(engine: &DataEngine, action: FavoritesAction) -> Result<(), CliError> {
    match action {
        FavoritesAction::Add {
            name,
            lat,
            lon,
            address,
            id,
        } => {
            let id = id.unwrap_or_else(|| slug(&name));
            let favorite =
                FavoriteLocation::new(id.as_str(), name.as_str(), lat, lon, address.as_str());
            engine.ledger().save(favorite).await?;

            let state = match engine.ledger().get(&id).map(|f| f.sync_state) {
                Some(SyncState::Synced) => "synced",
                _ => "saved locally, pending sync",
            };
            println!("Saved '{}' as {} ({})", name, id, state);
            Ok(())
        }
        FavoritesAction::List => {
            let favorites = engine.ledger().list();
            if favorites.is_empty() {
                println!("No favorites saved.");
                return Ok(());
            }
            for favorite in favorites {
                let marker = match favorite.sync_state {
                    SyncState::Synced => ' ',
                    SyncState::Local => '*',
                };
                println!(
                    "{} {:24} {:>10.5}, {:>10.5}  {}",
                    marker, favorite.id, favorite.latitude, favorite.longitude, favorite.name
                );
            }
            println!("(* = not yet synced)");
            Ok(())
        }
        FavoritesAction::Remove { id } => {
            engine.ledger().remove(&id).await?;
            println!("Removed {}", id);
            Ok(())
        }
    }
}

fn slug(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect::<String>()
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug_normalizes_names() {
        assert_eq!(slug("Mama's Kitchen"), "mama-s-kitchen");
        assert_eq!(slug("  Home  "), "home");
        assert_eq!(slug("A/B C"), "a-b-c");
    }
}
