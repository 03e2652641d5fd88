use std::collections::HashSet;
use std::time::Instant;

use tracing::{debug, error};

use crate::catalog::{Catalog, RemoteAsset, RemoteSet, SetLookup};
use crate::{Error, Result};

/// Snapshot of the target set taken once at run start.
#[derive(Debug, Clone)]
pub enum RemoteState {
    SetAbsent,
    SetPresent(RemoteSet),
}

impl RemoteState {
    pub fn set_id(&self) -> Option<&str> {
        match self {
            Self::SetAbsent => None,
            Self::SetPresent(set) => Some(&set.remote_id),
        }
    }

    pub fn assets(&self) -> &[RemoteAsset] {
        match self {
            Self::SetAbsent => &[],
            Self::SetPresent(set) => &set.assets,
        }
    }

    pub fn asset_names(&self) -> HashSet<&str> {
        self.assets()
            .iter()
            .map(|a| a.display_name.as_str())
            .collect()
    }
}

/// Looks up `set_name` in the catalog. Any failure here is fatal for the run:
/// authentication problems stay `AuthRequired`, everything else becomes
/// `RemoteUnavailable`.
pub async fn resolve_remote_state<C: Catalog + ?Sized>(
    catalog: &C,
    set_name: &str,
) -> Result<RemoteState> {
    let started = Instant::now();
    debug!(event = "phase.start", phase = "resolve", set_name, "phase.start");

    let lookup = catalog.find_set_by_name(set_name).await.map_err(|e| {
        error!(
            event = "catalog.lookup_failed",
            provider = catalog.provider(),
            set_name,
            error = %e,
            "catalog.lookup_failed"
        );
        match e {
            Error::AuthRequired { .. } | Error::RemoteUnavailable { .. } => e,
            other => Error::RemoteUnavailable {
                message: other.to_string(),
            },
        }
    })?;

    let state = match lookup {
        SetLookup::Absent => RemoteState::SetAbsent,
        SetLookup::Present(set) => RemoteState::SetPresent(set),
    };

    debug!(
        event = "phase.finish",
        phase = "resolve",
        duration_ms = started.elapsed().as_millis() as u64,
        set_present = state.set_id().is_some(),
        remote_assets = state.assets().len() as u64,
        "phase.finish"
    );
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;

    #[tokio::test]
    async fn absent_and_present_sets() {
        let catalog = InMemoryCatalog::new();
        let state = resolve_remote_state(&catalog, "trip").await.unwrap();
        assert!(matches!(state, RemoteState::SetAbsent));
        assert!(state.asset_names().is_empty());

        let id = catalog.insert_set("trip", &[], &["a.jpg", "b.jpg"]).await;
        let state = resolve_remote_state(&catalog, "trip").await.unwrap();
        assert_eq!(state.set_id(), Some(id.as_str()));
        let names = state.asset_names();
        assert!(names.contains("a.jpg"));
        assert!(names.contains("b.jpg"));
        assert_eq!(names.len(), 2);
    }
}
