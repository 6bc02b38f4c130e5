// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Filesystem snapshot store.
//!
//! Layout per device:
//! ```text
//! <root>/<device>/rib/<vrf>.<afi>.latest.json
//! <root>/<device>/rib/<vrf>.<afi>.<ts>.json.gz
//! <root>/<device>/bgp/...
//! <root>/<device>/diffs/<vrf>.<afi>.<ts>.json.gz
//! ```
//! "latest" is replaced via a temporary sibling and an atomic rename, so
//! readers see either the old or the new snapshot, never a torn one.
//! Archives are write-once; a second archive in the same second gets a
//! `-N` suffix rather than clobbering the first.

use crate::diff::{DiffPayload, DiffSummary};
use crate::error::Error;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use slog::{error, Logger};
use snapdb_types::{AddressFamily, TableKind, Timestamp};
use std::collections::BTreeSet;
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// How many `-N` suffixes to try before giving up on a same-second
/// archive collision.
const ARCHIVE_RETRY_MAX: u32 = 100;

/// The `(vrf, afi)` pairs a device has snapshots for, per table kind.
/// Derived entirely from the files present.
#[derive(
    Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq,
)]
pub struct Coordinates {
    pub rib: Vec<(String, AddressFamily)>,
    pub bgp: Vec<(String, AddressFamily)>,
}

/// One entry in a device's diff series.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct DiffMeta {
    pub vrf: String,
    pub afi: AddressFamily,
    pub ts: Timestamp,
    pub summary: DiffSummary,
}

#[derive(Clone)]
pub struct Store {
    root: PathBuf,
    log: Logger,
}

impl Store {
    pub fn new<P: Into<PathBuf>>(root: P, log: Logger) -> Self {
        Self {
            root: root.into(),
            log,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn device_dir(&self, device: &str) -> PathBuf {
        self.root.join(device)
    }

    fn table_dir(&self, device: &str, kind: TableKind) -> PathBuf {
        self.device_dir(device).join(kind.to_string())
    }

    fn diffs_dir(&self, device: &str) -> PathBuf {
        self.device_dir(device).join("diffs")
    }

    fn latest_path(
        &self,
        device: &str,
        kind: TableKind,
        vrf: &str,
        afi: AddressFamily,
    ) -> PathBuf {
        self.table_dir(device, kind)
            .join(format!("{vrf}.{afi}.latest.json"))
    }

    /// Device names become path components; reject anything that would
    /// escape the store root.
    fn check_device_name(name: &str) -> Result<(), Error> {
        if name.is_empty()
            || name.contains(['/', '\\'])
            || name == "."
            || name == ".."
        {
            return Err(Error::InvalidName(name.to_string()));
        }
        Ok(())
    }

    /// VRF names become the first dot-separated field of snapshot
    /// filenames, so they must stay dot-free for listings to parse.
    fn check_vrf_name(name: &str) -> Result<(), Error> {
        if name.is_empty() || name.contains(['/', '\\', '.']) {
            return Err(Error::InvalidName(name.to_string()));
        }
        Ok(())
    }

    /// Read the current snapshot for a coordinate. `None` means the
    /// coordinate has never had a successful cycle (cold start).
    pub fn read_latest<R: DeserializeOwned>(
        &self,
        device: &str,
        kind: TableKind,
        vrf: &str,
        afi: AddressFamily,
    ) -> Result<Option<Vec<R>>, Error> {
        let path = self.latest_path(device, kind, vrf, afi);
        let file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(None)
            }
            Err(e) => return Err(e.into()),
        };
        let rows = serde_json::from_reader(BufReader::new(file))?;
        Ok(Some(rows))
    }

    /// Persist a snapshot: gzip archive first (append-only, cheap to
    /// abandon on failure), then replace "latest" atomically. Returns
    /// the timestamp actually used for the archive, which may carry a
    /// collision suffix.
    pub fn write_latest_and_archive<R: Serialize>(
        &self,
        device: &str,
        kind: TableKind,
        vrf: &str,
        afi: AddressFamily,
        rows: &[R],
        ts: &Timestamp,
    ) -> Result<Timestamp, Error> {
        Self::check_device_name(device)?;
        Self::check_vrf_name(vrf)?;
        let dir = self.table_dir(device, kind);
        fs::create_dir_all(&dir)?;

        // Sorted-key JSON for both artifacts: routing through Value gives
        // deterministic key order regardless of struct field order.
        let value = serde_json::to_value(rows)?;

        let ts = self.write_gz_once(&dir, vrf, afi, ts, &value)?;

        // From here on the archive exists; failures are reported as
        // latest-replace errors so callers can escalate while keeping
        // the archive as forensic evidence.
        let latest = self.latest_path(device, kind, vrf, afi);
        let tmp = latest.with_extension("json.tmp");
        let write_tmp = || -> std::io::Result<()> {
            let file = fs::File::create(&tmp)?;
            let mut w = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut w, &value)
                .map_err(std::io::Error::other)?;
            w.write_all(b"\n")?;
            w.flush()?;
            Ok(())
        };
        write_tmp().map_err(Error::LatestReplace)?;
        fs::rename(&tmp, &latest).map_err(Error::LatestReplace)?;

        Ok(ts)
    }

    /// Write one gzip archive without overwriting an existing timestamp.
    fn write_gz_once(
        &self,
        dir: &Path,
        vrf: &str,
        afi: AddressFamily,
        ts: &Timestamp,
        value: &serde_json::Value,
    ) -> Result<Timestamp, Error> {
        let mut attempt = ts.clone();
        for n in 1..=ARCHIVE_RETRY_MAX {
            let path = dir.join(format!("{vrf}.{afi}.{attempt}.json.gz"));
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(file) => {
                    let mut enc =
                        GzEncoder::new(file, Compression::default());
                    serde_json::to_writer(&mut enc, value)?;
                    enc.finish()?;
                    return Ok(attempt);
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::AlreadyExists =>
                {
                    attempt = ts.with_suffix(n);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(Error::ArchiveCollision(format!("{vrf}.{afi}.{ts}")))
    }

    /// Archive timestamps for a coordinate, oldest first. Lexical order
    /// of the timestamp strings is chronological order.
    pub fn list_archive_timestamps(
        &self,
        device: &str,
        kind: TableKind,
        vrf: &str,
        afi: AddressFamily,
    ) -> Result<Vec<Timestamp>, Error> {
        let dir = self.table_dir(device, kind);
        let mut out = Vec::new();
        for name in self.list_file_names(&dir)? {
            if let Some((v, a, SnapName::Archive(ts))) =
                parse_snapshot_name(&name)
            {
                if v == vrf && a == afi {
                    out.push(ts);
                }
            }
        }
        out.sort();
        Ok(out)
    }

    pub fn read_archive<R: DeserializeOwned>(
        &self,
        device: &str,
        kind: TableKind,
        vrf: &str,
        afi: AddressFamily,
        ts: &Timestamp,
    ) -> Result<Vec<R>, Error> {
        let path = self
            .table_dir(device, kind)
            .join(format!("{vrf}.{afi}.{ts}.json.gz"));
        self.read_gz(&path)
    }

    /// Write the combined RIB+BGP diff artifact for a coordinate.
    pub fn write_diff(
        &self,
        device: &str,
        vrf: &str,
        afi: AddressFamily,
        ts: &Timestamp,
        payload: &DiffPayload,
    ) -> Result<Timestamp, Error> {
        Self::check_device_name(device)?;
        Self::check_vrf_name(vrf)?;
        let dir = self.diffs_dir(device);
        fs::create_dir_all(&dir)?;
        let value = serde_json::to_value(payload)?;
        self.write_gz_once(&dir, vrf, afi, ts, &value)
    }

    pub fn read_diff(
        &self,
        device: &str,
        vrf: &str,
        afi: AddressFamily,
        ts: &Timestamp,
    ) -> Result<DiffPayload, Error> {
        let path = self
            .diffs_dir(device)
            .join(format!("{vrf}.{afi}.{ts}.json.gz"));
        self.read_gz(&path)
    }

    /// The diff series for a device, newest first, optionally narrowed
    /// to one vrf and/or afi. Summaries come from the archived payloads;
    /// an unreadable archive is logged and skipped rather than failing
    /// the whole listing.
    pub fn list_diffs(
        &self,
        device: &str,
        vrf: Option<&str>,
        afi: Option<AddressFamily>,
    ) -> Result<Vec<DiffMeta>, Error> {
        let dir = self.diffs_dir(device);
        let mut out = Vec::new();
        for name in self.list_file_names(&dir)? {
            let Some((v, a, SnapName::Archive(ts))) =
                parse_snapshot_name(&name)
            else {
                continue;
            };
            if vrf.is_some_and(|want| want != v) {
                continue;
            }
            if afi.is_some_and(|want| want != a) {
                continue;
            }
            let payload: DiffPayload = match self.read_gz(&dir.join(&name)) {
                Ok(p) => p,
                Err(e) => {
                    error!(
                        self.log,
                        "store: skipping unreadable diff archive";
                        "path" => %dir.join(&name).display(),
                        "error" => %e,
                    );
                    continue;
                }
            };
            out.push(DiffMeta {
                vrf: v,
                afi: a,
                ts,
                summary: payload.summary(),
            });
        }
        out.sort_by(|x, y| y.ts.cmp(&x.ts));
        Ok(out)
    }

    /// Devices present in the store, derived from the directory itself.
    pub fn devices(&self) -> Result<Vec<String>, Error> {
        let entries = match fs::read_dir(&self.root) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Vec::new())
            }
            Err(e) => return Err(e.into()),
        };
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                out.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        out.sort();
        Ok(out)
    }

    /// The `(vrf, afi)` coordinates a device has any snapshot for,
    /// latest or archived.
    pub fn coordinates(&self, device: &str) -> Result<Coordinates, Error> {
        let mut out = Coordinates::default();
        for kind in [TableKind::Rib, TableKind::Bgp] {
            let dir = self.table_dir(device, kind);
            let mut seen = BTreeSet::new();
            for name in self.list_file_names(&dir)? {
                if let Some((vrf, afi, _)) = parse_snapshot_name(&name) {
                    seen.insert((vrf, afi));
                }
            }
            let pairs = seen.into_iter().collect();
            match kind {
                TableKind::Rib => out.rib = pairs,
                TableKind::Bgp => out.bgp = pairs,
            }
        }
        Ok(out)
    }

    fn list_file_names(&self, dir: &Path) -> Result<Vec<String>, Error> {
        let entries = match fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Vec::new())
            }
            Err(e) => return Err(e.into()),
        };
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                out.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        Ok(out)
    }

    fn read_gz<T: DeserializeOwned>(&self, path: &Path) -> Result<T, Error> {
        let file = match fs::File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(path.display().to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let dec = GzDecoder::new(BufReader::new(file));
        Ok(serde_json::from_reader(dec)?)
    }
}

enum SnapName {
    Latest,
    Archive(Timestamp),
}

/// Split `<vrf>.<afi>.latest.json` / `<vrf>.<afi>.<ts>.json.gz`. VRF
/// names never contain dots (the store rejects them on write), so a
/// plain split is unambiguous. Anything else in the directory is ignored.
fn parse_snapshot_name(
    name: &str,
) -> Option<(String, AddressFamily, SnapName)> {
    let (vrf, rest) = name.split_once('.')?;
    let (afi, rest) = rest.split_once('.')?;
    let afi: AddressFamily = afi.parse().ok()?;
    let snap = if rest == "latest.json" {
        SnapName::Latest
    } else {
        let ts = rest.strip_suffix(".json.gz")?;
        SnapName::Archive(ts.parse().ok()?)
    };
    Some((vrf.to_string(), afi, snap))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::diff::{bgp_diff, rib_diff};
    use snapdb_types::{NextHop, Prefix, RibRow};
    use std::str::FromStr;

    fn test_store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::TempDir::new().unwrap();
        let log = rs_common::log::init_logger();
        (Store::new(dir.path(), log), dir)
    }

    fn rib_row(prefix: &str) -> RibRow {
        RibRow {
            device: "r1".into(),
            vrf: "default".into(),
            afi: AddressFamily::Ipv4,
            prefix: Prefix::from_str(prefix).unwrap(),
            protocol: "ospf".into(),
            distance: Some(110),
            metric: Some(20),
            best: true,
            nexthops: [NextHop::new("1.1.1.1", None)].into_iter().collect(),
        }
    }

    #[test]
    fn cold_start_reads_none() {
        let (store, _dir) = test_store();
        let rows: Option<Vec<RibRow>> = store
            .read_latest("r1", TableKind::Rib, "default", AddressFamily::Ipv4)
            .unwrap();
        assert!(rows.is_none());
    }

    #[test]
    fn latest_round_trip() {
        let (store, _dir) = test_store();
        let rows = vec![rib_row("10.0.0.0/24"), rib_row("10.1.0.0/24")];
        let ts = Timestamp::now();
        store
            .write_latest_and_archive(
                "r1",
                TableKind::Rib,
                "default",
                AddressFamily::Ipv4,
                &rows,
                &ts,
            )
            .unwrap();
        let back: Vec<RibRow> = store
            .read_latest("r1", TableKind::Rib, "default", AddressFamily::Ipv4)
            .unwrap()
            .unwrap();
        assert_eq!(back, rows);

        // no torn temporary left behind
        let dir = store.table_dir("r1", TableKind::Rib);
        let leftovers: Vec<_> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .filter(|n| n.ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn archive_collision_gets_suffix() {
        let (store, _dir) = test_store();
        let rows = vec![rib_row("10.0.0.0/24")];
        let ts: Timestamp = "20250811031450".parse().unwrap();
        let first = store
            .write_latest_and_archive(
                "r1",
                TableKind::Rib,
                "default",
                AddressFamily::Ipv4,
                &rows,
                &ts,
            )
            .unwrap();
        let second = store
            .write_latest_and_archive(
                "r1",
                TableKind::Rib,
                "default",
                AddressFamily::Ipv4,
                &rows,
                &ts,
            )
            .unwrap();
        assert_eq!(first.as_str(), "20250811031450");
        assert_eq!(second.as_str(), "20250811031450-1");

        let listed = store
            .list_archive_timestamps(
                "r1",
                TableKind::Rib,
                "default",
                AddressFamily::Ipv4,
            )
            .unwrap();
        assert_eq!(listed, vec![first.clone(), second.clone()]);

        let back: Vec<RibRow> = store
            .read_archive(
                "r1",
                TableKind::Rib,
                "default",
                AddressFamily::Ipv4,
                &second,
            )
            .unwrap();
        assert_eq!(back, rows);
    }

    #[test]
    fn archive_order_is_chronological() {
        let (store, _dir) = test_store();
        let rows = vec![rib_row("10.0.0.0/24")];
        for ts in ["20250811031455", "20250811031450", "20250812000000"] {
            store
                .write_latest_and_archive(
                    "r1",
                    TableKind::Rib,
                    "default",
                    AddressFamily::Ipv4,
                    &rows,
                    &ts.parse().unwrap(),
                )
                .unwrap();
        }
        let listed = store
            .list_archive_timestamps(
                "r1",
                TableKind::Rib,
                "default",
                AddressFamily::Ipv4,
            )
            .unwrap();
        let strs: Vec<_> = listed.iter().map(|t| t.as_str()).collect();
        assert_eq!(
            strs,
            vec!["20250811031450", "20250811031455", "20250812000000"]
        );
    }

    #[test]
    fn diff_round_trip_and_listing() {
        let (store, _dir) = test_store();
        let payload = DiffPayload {
            device: "r1".into(),
            vrf: "default".into(),
            afi: AddressFamily::Ipv4,
            rib: rib_diff(vec![], vec![rib_row("10.0.0.0/24")]),
            bgp: bgp_diff(vec![], vec![]),
        };
        let ts: Timestamp = "20250811031450".parse().unwrap();
        store
            .write_diff("r1", "default", AddressFamily::Ipv4, &ts, &payload)
            .unwrap();

        let back = store
            .read_diff("r1", "default", AddressFamily::Ipv4, &ts)
            .unwrap();
        assert_eq!(back, payload);

        let diffs =
            store.list_diffs("r1", Some("default"), None).unwrap();
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].summary.added, 1);
        assert_eq!(diffs[0].ts, ts);

        assert!(store
            .list_diffs("r1", Some("other"), None)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn enumeration_from_directory() {
        let (store, _dir) = test_store();
        let rows = vec![rib_row("10.0.0.0/24")];
        let ts = Timestamp::now();
        for (device, vrf, afi) in [
            ("r1", "default", AddressFamily::Ipv4),
            ("r1", "CUSTOMER_A", AddressFamily::Ipv6),
            ("r2", "default", AddressFamily::Ipv4),
        ] {
            store
                .write_latest_and_archive(
                    device,
                    TableKind::Rib,
                    vrf,
                    afi,
                    &rows,
                    &ts,
                )
                .unwrap();
        }
        assert_eq!(store.devices().unwrap(), vec!["r1", "r2"]);
        let coords = store.coordinates("r1").unwrap();
        assert_eq!(
            coords.rib,
            vec![
                ("CUSTOMER_A".to_string(), AddressFamily::Ipv6),
                ("default".to_string(), AddressFamily::Ipv4),
            ]
        );
        assert!(coords.bgp.is_empty());
    }

    #[test]
    fn names_with_separators_are_rejected() {
        let (store, _dir) = test_store();
        let rows = vec![rib_row("10.0.0.0/24")];
        let ts = Timestamp::now();
        for bad_device in ["../escape", "a/b", ".", ""] {
            assert!(store
                .write_latest_and_archive(
                    bad_device,
                    TableKind::Rib,
                    "default",
                    AddressFamily::Ipv4,
                    &rows,
                    &ts,
                )
                .is_err());
        }
        // vrf names additionally may not contain dots, they delimit the
        // snapshot filename fields
        for bad_vrf in ["a.b", "x/y", ""] {
            assert!(store
                .write_latest_and_archive(
                    "r1",
                    TableKind::Rib,
                    bad_vrf,
                    AddressFamily::Ipv4,
                    &rows,
                    &ts,
                )
                .is_err());
        }
        // a dotted device name (fqdn) is fine
        assert!(store
            .write_latest_and_archive(
                "edge1.example.net",
                TableKind::Rib,
                "default",
                AddressFamily::Ipv4,
                &rows,
                &ts,
            )
            .is_ok());
    }

    #[test]
    fn latest_is_sorted_key_indented_json() {
        let (store, _dir) = test_store();
        let rows = vec![rib_row("10.0.0.0/24")];
        store
            .write_latest_and_archive(
                "r1",
                TableKind::Rib,
                "default",
                AddressFamily::Ipv4,
                &rows,
                &Timestamp::now(),
            )
            .unwrap();
        let text = std::fs::read_to_string(store.latest_path(
            "r1",
            TableKind::Rib,
            "default",
            AddressFamily::Ipv4,
        ))
        .unwrap();
        // keys in lexical order: afi before best before device ...
        let afi_at = text.find("\"afi\"").unwrap();
        let best_at = text.find("\"best\"").unwrap();
        let device_at = text.find("\"device\"").unwrap();
        assert!(afi_at < best_at && best_at < device_at);
        assert!(text.contains("  \"afi\""));
    }
}
