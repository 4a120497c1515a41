use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use std::{fmt::Write as _, io, path::Path};

use crate::provider::HolderRecord;
use crate::tracker::FetchState;

const ADDRESS_HEADER: &str = "Address";
const BALANCE_HEADER: &str = "Balance";

#[derive(Debug, Serialize)]
struct HolderRow<'a> {
    contract_address: &'a str,
    holder_address: &'a str,
    balance: &'a str,
}

/// Text rendition of a snapshot: a loading line, the holder table once loaded,
/// and the error line whenever an error is set.
pub fn render(state: &FetchState, color: bool) -> String {
    let mut out = String::new();

    if state.loading {
        out.push_str("Loading...\n");
    }

    if !state.holders.is_empty() && !state.loading {
        out.push_str(&render_table(&state.holders));
        let _ = writeln!(
            out,
            "{} of {} holders shown",
            state.holders.len(),
            state.holders_count
        );
    }

    if let Some(err) = &state.error {
        let line = format!("Error: {}", err);
        if color {
            let _ = writeln!(out, "{}", line.red());
        } else {
            let _ = writeln!(out, "{}", line);
        }
    }

    out
}

pub fn render_table(holders: &[HolderRecord]) -> String {
    let address_width = holders
        .iter()
        .map(|h| h.holder_address.len())
        .chain(std::iter::once(ADDRESS_HEADER.len()))
        .max()
        .unwrap_or_default();
    let balance_width = holders
        .iter()
        .map(|h| h.balance.len())
        .chain(std::iter::once(BALANCE_HEADER.len()))
        .max()
        .unwrap_or_default();

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<aw$}  {:>bw$}",
        ADDRESS_HEADER,
        BALANCE_HEADER,
        aw = address_width,
        bw = balance_width
    );
    let _ = writeln!(out, "{}  {}", "-".repeat(address_width), "-".repeat(balance_width));
    for holder in holders {
        let _ = writeln!(
            out,
            "{:<aw$}  {:>bw$}",
            holder.holder_address,
            holder.balance,
            aw = address_width,
            bw = balance_width
        );
    }
    out
}

pub fn write_csv<W: io::Write>(writer: W, contract_address: &str, holders: &[HolderRecord]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for holder in holders {
        wtr.serialize(HolderRow {
            contract_address,
            holder_address: &holder.holder_address,
            balance: &holder.balance,
        })?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn export_csv(path: &Path, contract_address: &str, holders: &[HolderRecord]) -> Result<()> {
    let file = std::fs::File::create(path)?;
    write_csv(file, contract_address, holders)
}
