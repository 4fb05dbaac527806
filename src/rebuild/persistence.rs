//! Rebuild Persistence.
//!
//! A single binary file, strictly linear (no random access): a short
//! header, then three length-prefixed payload sections. All integers are
//! native-endian fixed width. Version bumps are incompatible — the loader
//! rejects a mismatched magic or version outright.

use crate::rebuild::types::{ConditionInfo, Snapshot, UserConditionHistory, UserState, MAX_OUTCOMES};
use anyhow::{bail, Context, Result};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

const MAGIC: u32 = 0x504e_4c52; // "PNLR"
const VERSION: u32 = 1;

pub struct RebuildData {
    pub cond_ids: Vec<String>,
    pub cond_info: Vec<ConditionInfo>,
    pub token_map: Vec<(String, u32, u8)>,
    pub user_ids: Vec<String>,
    pub users: Vec<UserState>,
}

fn write_string(w: &mut impl Write, s: &str) -> Result<()> {
    let bytes = s.as_bytes();
    w.write_all(&(bytes.len() as u32).to_ne_bytes())?;
    w.write_all(bytes)?;
    Ok(())
}

fn read_string(r: &mut impl Read) -> Result<String> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)?;
    let len = u32::from_ne_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).context("decoding string payload")
}

fn write_i64(w: &mut impl Write, v: i64) -> Result<()> {
    w.write_all(&v.to_ne_bytes()).map_err(Into::into)
}

fn read_i64(r: &mut impl Read) -> Result<i64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(i64::from_ne_bytes(buf))
}

fn write_u32(w: &mut impl Write, v: u32) -> Result<()> {
    w.write_all(&v.to_ne_bytes()).map_err(Into::into)
}

fn read_u32(r: &mut impl Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_ne_bytes(buf))
}

fn write_u8(w: &mut impl Write, v: u8) -> Result<()> {
    w.write_all(&[v]).map_err(Into::into)
}

fn read_u8(r: &mut impl Read) -> Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn write_snapshot(w: &mut impl Write, s: &Snapshot) -> Result<()> {
    write_i64(w, s.timestamp)?;
    write_i64(w, s.delta)?;
    write_i64(w, s.price)?;
    for p in &s.positions {
        write_i64(w, *p)?;
    }
    write_i64(w, s.cost_basis)?;
    write_i64(w, s.realized_pnl)?;
    write_u8(w, s.event_type)?;
    write_u8(w, s.token_index)?;
    write_u8(w, s.outcome_count)?;
    w.write_all(&s._pad)?;
    Ok(())
}

fn read_snapshot(r: &mut impl Read) -> Result<Snapshot> {
    let timestamp = read_i64(r)?;
    let delta = read_i64(r)?;
    let price = read_i64(r)?;
    let mut positions = [0i64; MAX_OUTCOMES];
    for p in positions.iter_mut() {
        *p = read_i64(r)?;
    }
    let cost_basis = read_i64(r)?;
    let realized_pnl = read_i64(r)?;
    let event_type = read_u8(r)?;
    let token_index = read_u8(r)?;
    let outcome_count = read_u8(r)?;
    let mut pad = [0u8; 5];
    r.read_exact(&mut pad)?;
    Ok(Snapshot {
        timestamp,
        delta,
        price,
        positions,
        cost_basis,
        realized_pnl,
        event_type,
        token_index,
        outcome_count,
        _pad: pad,
    })
}

/// Saves `data` to `path`, overwriting any existing file. Callers must
/// only do this after a rebuild has fully completed — a partial rebuild
/// must never be persisted.
pub fn save(path: impl AsRef<Path>, data: &RebuildData) -> Result<()> {
    if let Some(parent) = path.as_ref().parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let file = std::fs::File::create(path.as_ref()).context("creating rebuild persistence file")?;
    let mut w = BufWriter::new(file);

    write_u32(&mut w, MAGIC)?;
    write_u32(&mut w, VERSION)?;

    write_u32(&mut w, data.cond_ids.len() as u32)?;
    for (id, info) in data.cond_ids.iter().zip(&data.cond_info) {
        write_string(&mut w, id)?;
        write_u8(&mut w, info.outcome_count)?;
        write_i64(&mut w, info.payout_denominator)?;
        write_u32(&mut w, info.payout_numerators.len() as u32)?;
        for n in &info.payout_numerators {
            write_i64(&mut w, *n)?;
        }
    }

    write_u32(&mut w, data.token_map.len() as u32)?;
    for (token_id, cond_index, outcome_index) in &data.token_map {
        write_string(&mut w, token_id)?;
        write_u32(&mut w, *cond_index)?;
        write_u8(&mut w, *outcome_index)?;
    }

    write_u32(&mut w, data.user_ids.len() as u32)?;
    for (user_id, state) in data.user_ids.iter().zip(&data.users) {
        write_string(&mut w, user_id)?;
        write_u32(&mut w, state.histories.len() as u32)?;
        for history in &state.histories {
            write_u32(&mut w, history.cond_index)?;
            write_u32(&mut w, (history.snapshots.len() * std::mem::size_of::<Snapshot>()) as u32)?;
            for snap in &history.snapshots {
                write_snapshot(&mut w, snap)?;
            }
        }
    }

    w.flush()?;
    Ok(())
}

pub fn load(path: impl AsRef<Path>) -> Result<RebuildData> {
    let file = std::fs::File::open(path.as_ref()).context("opening rebuild persistence file")?;
    let mut r = BufReader::new(file);

    let magic = read_u32(&mut r)?;
    if magic != MAGIC {
        bail!("rebuild file has bad magic {magic:#x}, expected {MAGIC:#x}");
    }
    let version = read_u32(&mut r)?;
    if version != VERSION {
        bail!("rebuild file is version {version}, this build only reads version {VERSION}");
    }

    let cond_count = read_u32(&mut r)? as usize;
    let mut cond_ids = Vec::with_capacity(cond_count);
    let mut cond_info = Vec::with_capacity(cond_count);
    for _ in 0..cond_count {
        let id = read_string(&mut r)?;
        let outcome_count = read_u8(&mut r)?;
        let payout_denominator = read_i64(&mut r)?;
        let numerator_count = read_u32(&mut r)? as usize;
        let mut payout_numerators = Vec::with_capacity(numerator_count);
        for _ in 0..numerator_count {
            payout_numerators.push(read_i64(&mut r)?);
        }
        cond_ids.push(id);
        cond_info.push(ConditionInfo {
            outcome_count,
            payout_numerators,
            payout_denominator,
        });
    }

    let token_count = read_u32(&mut r)? as usize;
    let mut token_map = Vec::with_capacity(token_count);
    for _ in 0..token_count {
        let token_id = read_string(&mut r)?;
        let cond_index = read_u32(&mut r)?;
        let outcome_index = read_u8(&mut r)?;
        token_map.push((token_id, cond_index, outcome_index));
    }

    let user_count = read_u32(&mut r)? as usize;
    let mut user_ids = Vec::with_capacity(user_count);
    let mut users = Vec::with_capacity(user_count);
    for _ in 0..user_count {
        let user_id = read_string(&mut r)?;
        let history_count = read_u32(&mut r)? as usize;
        let mut histories = Vec::with_capacity(history_count);
        for _ in 0..history_count {
            let cond_index = read_u32(&mut r)?;
            let byte_len = read_u32(&mut r)? as usize;
            let snapshot_count = byte_len / std::mem::size_of::<Snapshot>();
            let mut snapshots = Vec::with_capacity(snapshot_count);
            for _ in 0..snapshot_count {
                snapshots.push(read_snapshot(&mut r)?);
            }
            histories.push(UserConditionHistory { cond_index, snapshots });
        }
        user_ids.push(user_id);
        users.push(UserState { histories });
    }

    Ok(RebuildData {
        cond_ids,
        cond_info,
        token_map,
        user_ids,
        users,
    })
}
