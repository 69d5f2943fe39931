// Copyright 2021-2022 Farcaster Devs
//
// This library is free software; you can redistribute it and/or
// modify it under the terms of the GNU Lesser General Public
// License as published by the Free Software Foundation; either
// version 3 of the License, or (at your option) any later version.
//
// This library is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU
// Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public
// License along with this library; if not, write to the Free Software
// Foundation, Inc., 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301, USA

//! Trade stores: JSON snapshots kept in memory, or one JSON file per trade written atomically.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::services::{Persistence, StoreError};
use crate::trade::{Trade, TradeId};

/// Keeps the last JSON snapshot of every trade in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    snapshots: BTreeMap<TradeId, String>,
    saves: usize,
    failing: bool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        self.saves
    }

    /// Make every following save fail, or succeed again.
    pub fn set_failing(&mut self, failing: bool) {
        self.failing = failing;
    }

    /// Last snapshot of a trade.
    pub fn snapshot(&self, id: &TradeId) -> Option<&str> {
        self.snapshots.get(id).map(String::as_str)
    }
}

impl Persistence for MemoryStore {
    fn save(&mut self, trade: &Trade) -> Result<(), StoreError> {
        if self.failing {
            return Err(io::Error::new(io::ErrorKind::Other, "store unavailable").into());
        }
        self.snapshots.insert(trade.id, serde_json::to_string(trade)?);
        self.saves += 1;
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<Trade>, StoreError> {
        self.snapshots
            .values()
            .map(|s| serde_json::from_str(s).map_err(StoreError::from))
            .collect()
    }
}

/// Stores every trade in `<dir>/<trade id>.json`. A save writes and syncs a temporary file, then
/// renames it over the previous version and syncs the directory, so a crash or a power loss
/// leaves either the previous or the new version of the trade on disk.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

const EXTENSION: &str = "json";

impl JsonFileStore {
    /// Open the store in `dir`, creating the directory if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    fn path(&self, id: &TradeId) -> PathBuf {
        self.dir.join(format!("{}.{}", id, EXTENSION))
    }
}

// the rename is only durable once the directory entry is
#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

impl Persistence for JsonFileStore {
    fn save(&mut self, trade: &Trade) -> Result<(), StoreError> {
        let path = self.path(&trade.id);
        let tmp_path = path.with_extension("json.tmp");
        let mut file = File::create(&tmp_path)?;
        file.write_all(&serde_json::to_vec_pretty(trade)?)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp_path, &path)?;
        sync_dir(&self.dir)?;
        trace!(trade_id = %trade.id, path = %path.display(), "Trade saved");
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<Trade>, StoreError> {
        let mut paths = vec![];
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(EXTENSION) {
                paths.push(path);
            }
        }
        paths.sort();
        paths
            .iter()
            .map(|p| Ok(serde_json::from_slice(&fs::read(p)?)?))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::Amount;
    use uuid::Uuid;

    use super::*;
    use crate::offer::Offer;
    use crate::role::{TradeRole, TradeSide};
    use crate::trade::{NodeAddress, TradeState, TradeTerms};
    use crate::version::ProtocolVersion;

    fn trade() -> Trade {
        let offer = Offer {
            id: TradeId(Uuid::new_v4()),
            direction: TradeSide::Seller,
            amount: Amount::from_sat(1_000_000),
            min_amount: Amount::from_sat(1_000_000),
            price: 3_000_000,
            currency_code: "USD".into(),
            payment_method_id: "ZELLE".into(),
            buyer_security_deposit: Amount::from_sat(150_000),
            seller_security_deposit: Amount::from_sat(150_000),
            maker_fee: Amount::from_sat(5_000),
            maker_fee_tx_id: None,
            version: ProtocolVersion::V5,
            maker_address: NodeAddress::new("maker.onion:9999"),
        };
        let terms = TradeTerms {
            amount: Amount::from_sat(1_000_000),
            price: 3_000_000,
            tx_fee: Amount::from_sat(1_000),
            taker_fee: Amount::from_sat(5_000),
        };
        Trade::new(
            offer,
            TradeRole::Taker,
            terms,
            NodeAddress::new("maker.onion:9999"),
        )
    }

    #[test]
    fn memory_store_keeps_last_snapshot() {
        let mut store = MemoryStore::new();
        let mut trade = trade();
        store.save(&trade).unwrap();
        trade.state = TradeState::TakerPublishedFeeTx;
        store.save(&trade).unwrap();
        assert_eq!(store.save_count(), 2);
        assert_eq!(store.load_all().unwrap(), vec![trade.clone()]);

        store.set_failing(true);
        assert!(matches!(store.save(&trade), Err(StoreError::Io(_))));
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = (trade(), trade());
        {
            let mut store = JsonFileStore::open(dir.path()).unwrap();
            store.save(&a).unwrap();
            store.save(&b).unwrap();
            store.save(&a).unwrap();
        }
        let store = JsonFileStore::open(dir.path()).unwrap();
        let mut loaded = store.load_all().unwrap();
        loaded.sort_by_key(|t| t.id);
        let mut expected = vec![a, b];
        expected.sort_by_key(|t| t.id);
        assert_eq!(loaded, expected);
        // no temporary file is left behind
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn file_store_ignores_an_interrupted_write() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonFileStore::open(dir.path()).unwrap();
        let mut trade = trade();
        store.save(&trade).unwrap();

        // a write interrupted before its rename leaves a truncated temporary file
        let tmp_path = store.path(&trade.id).with_extension("json.tmp");
        fs::write(&tmp_path, b"{\"id\":").unwrap();
        assert_eq!(store.load_all().unwrap(), vec![trade.clone()]);

        trade.state = TradeState::TakerPublishedFeeTx;
        store.save(&trade).unwrap();
        assert!(!tmp_path.exists());
        assert_eq!(store.load_all().unwrap(), vec![trade]);
    }
}
