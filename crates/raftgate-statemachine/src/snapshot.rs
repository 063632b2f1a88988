//! Snapshot encoding.
//!
//! A snapshot is newline-delimited JSON: one header line followed by one
//! line per counter, in ascending key order.
//!
//! ```text
//! {"version":1,"entries":2}
//! {"key":"/a","value":3}
//! {"key":"/b","value":1}
//! ```
//!
//! Keys are stored without the replica namespace so a snapshot taken on one
//! replica can be restored on another replica of the same cluster.

use crate::{Result, StateMachineError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use tokio_util::sync::CancellationToken;

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotHeader {
    version: u32,
    entries: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotRecord<'a> {
    #[serde(borrow)]
    key: std::borrow::Cow<'a, str>,
    value: u64,
}

/// Writes `entries` records to `sink`, checking `stop` before each record.
pub fn write_snapshot<'a, I>(
    sink: &mut dyn Write,
    stop: &CancellationToken,
    entries: usize,
    records: I,
) -> Result<()>
where
    I: IntoIterator<Item = (&'a str, u64)>,
{
    let mut writer = BufWriter::new(sink);

    write_line(
        &mut writer,
        &SnapshotHeader {
            version: SNAPSHOT_VERSION,
            entries: entries as u64,
        },
    )?;

    let mut written = 0usize;
    for (key, value) in records {
        if stop.is_cancelled() {
            return Err(StateMachineError::SnapshotStopped);
        }
        write_line(
            &mut writer,
            &SnapshotRecord {
                key: key.into(),
                value,
            },
        )?;
        written += 1;
    }

    if written != entries {
        return Err(StateMachineError::SnapshotCorrupt(format!(
            "header announced {} entries, wrote {}",
            entries, written
        )));
    }

    writer.flush()?;
    Ok(())
}

/// Reads a whole snapshot from `source`, checking `stop` before each record.
///
/// Nothing is returned until the stream has been fully validated.
pub fn read_snapshot(
    source: &mut dyn Read,
    stop: &CancellationToken,
) -> Result<BTreeMap<String, u64>> {
    let mut reader = BufReader::new(source);
    let mut line = String::new();

    if reader.read_line(&mut line)? == 0 {
        return Err(StateMachineError::SnapshotCorrupt("empty snapshot".into()));
    }
    let header: SnapshotHeader = serde_json::from_str(line.trim_end())
        .map_err(|e| StateMachineError::SnapshotCorrupt(format!("bad header: {}", e)))?;
    if header.version != SNAPSHOT_VERSION {
        return Err(StateMachineError::SnapshotCorrupt(format!(
            "unsupported snapshot version {}",
            header.version
        )));
    }

    let mut data = BTreeMap::new();
    for index in 0..header.entries {
        if stop.is_cancelled() {
            return Err(StateMachineError::SnapshotStopped);
        }

        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(StateMachineError::SnapshotCorrupt(format!(
                "truncated after {} of {} entries",
                index, header.entries
            )));
        }
        let record: SnapshotRecord<'_> = serde_json::from_str(line.trim_end())
            .map_err(|e| StateMachineError::SnapshotCorrupt(format!("bad record: {}", e)))?;
        let key = record.key.into_owned();
        if data.insert(key.clone(), record.value).is_some() {
            return Err(StateMachineError::SnapshotCorrupt(format!(
                "duplicate key {:?}",
                key
            )));
        }
    }

    line.clear();
    if reader.read_line(&mut line)? != 0 && !line.trim().is_empty() {
        return Err(StateMachineError::SnapshotCorrupt(
            "trailing data after last entry".into(),
        ));
    }

    Ok(data)
}

fn write_line<T: Serialize>(writer: &mut impl Write, value: &T) -> Result<()> {
    let mut bytes = serde_json::to_vec(value)
        .map_err(|e| StateMachineError::SnapshotCorrupt(e.to_string()))?;
    bytes.push(b'\n');
    writer.write_all(&bytes)?;
    Ok(())
}
