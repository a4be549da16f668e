//! Market index snapshot save/restore.
//!
//! One `setorder` line per slot, whitespace-separated:
//!
//! ```text
//! setorder <market> <buy|sell> <buy_price> <sell_price> <size[/alternate]> <active|ghost>
//! ```
//!
//! A slot is saved as `sell` when it holds an active sell or sits above the
//! highest observed sell (ghost sell). `active` is emitted only for slots
//! within `num_orders` of the lowest active sell; everything else reloads as
//! a ghost.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::engine::position::Side;
use crate::engine::Engine;
use crate::errors::{Error, Result};
use crate::market::SlotIndex;
use crate::transport::Transport;

/// One parsed `setorder` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetOrderCmd {
    pub market: String,
    pub side: Side,
    pub buy_price: String,
    pub sell_price: String,
    pub order_size: String,
    pub order_type: String,
}

/// Parse a `setorder` line; `Ok(None)` for blank lines and comments.
pub fn parse_setorder_line(line: &str) -> Result<Option<SetOrderCmd>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 7 || fields[0] != "setorder" {
        return Err(Error::parse(format!("bad setorder line: {line:?}")));
    }
    let side = Side::parse(fields[2])
        .ok_or_else(|| Error::parse(format!("bad side in setorder line: {line:?}")))?;
    if fields[6] != "active" && fields[6] != "ghost" {
        return Err(Error::parse(format!("bad order type in setorder line: {line:?}")));
    }
    Ok(Some(SetOrderCmd {
        market: fields[1].to_string(),
        side,
        buy_price: fields[3].to_string(),
        sell_price: fields[4].to_string(),
        order_size: fields[5].to_string(),
        order_type: fields[6].to_string(),
    }))
}

impl<T: Transport> Engine<T> {
    fn index_path(&self, filter: &str) -> PathBuf {
        Path::new(&self.settings.index_dir).join(format!("index-{filter}.txt"))
    }

    /// Save the position index of one market (or all) as `setorder` lines.
    pub fn save_market(&self, market: &str, num_orders: i64) -> Result<()> {
        let filter = if market.is_empty() { "all" } else { market };
        let num_orders = num_orders.max(15);

        let mut out = String::new();
        let mut saved_market_count = 0usize;

        for (current_market, info) in &self.markets {
            if filter != "all" && current_market.as_str() != filter {
                continue;
            }
            if current_market.is_empty() || info.position_index.is_empty() {
                continue;
            }

            // classify every slot against the live positions
            let mut buys: Vec<SlotIndex> = Vec::new();
            let mut sells: Vec<SlotIndex> = Vec::new();
            let mut highest_sell_idx: SlotIndex = 0;
            let mut lowest_sell_idx: SlotIndex = SlotIndex::MAX;

            for pos in self.store.iter() {
                if pos.market != *current_market {
                    continue;
                }
                for idx in &pos.market_indices {
                    if pos.side == Side::Sell {
                        sells.push(*idx);
                        if *idx > highest_sell_idx {
                            highest_sell_idx = *idx;
                        }
                        if *idx < lowest_sell_idx {
                            lowest_sell_idx = *idx;
                        }
                    } else {
                        buys.push(*idx);
                    }
                }
            }

            if buys.is_empty() && sells.is_empty() {
                error!(market = %current_market, "local error: no buy or sell indices for market");
                continue;
            }

            let mut current_index: SlotIndex = 0;
            for slot in &info.position_index {
                let is_active = (sells.contains(&current_index) || buys.contains(&current_index))
                    && current_index > lowest_sell_idx.saturating_sub(num_orders)
                    && current_index < lowest_sell_idx.saturating_add(num_orders);

                let is_sell = sells.contains(&current_index)
                    || (current_index > highest_sell_idx && highest_sell_idx > 0);

                out.push_str(&format!(
                    "setorder {} {} {} {} {} {}\n",
                    current_market,
                    if is_sell { Side::Sell } else { Side::Buy },
                    slot.buy_price,
                    slot.sell_price,
                    slot.size_field(),
                    if is_active { "active" } else { "ghost" },
                ));

                current_index += 1;
            }

            if current_index > 0 {
                saved_market_count += 1;
            }
            info!(market = %current_market, indices = current_index, "saved market");
        }

        if saved_market_count == 0 {
            info!("no markets saved");
            return Ok(());
        }

        let path = self.index_path(filter);
        fs::write(&path, out)
            .map_err(|e| Error::Io(format!("couldn't write {}: {e}", path.display())))?;
        Ok(())
    }

    /// Load a saved index file, replaying each line through `add_position`.
    /// Returns the number of applied lines.
    pub fn load_market_file(&mut self, path: &Path) -> Result<usize> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Io(format!("couldn't read {}: {e}", path.display())))?;

        let mut applied = 0usize;
        for line in content.lines() {
            let Some(cmd) = parse_setorder_line(line)? else {
                continue;
            };
            match self.add_position(
                &cmd.market,
                cmd.side,
                &cmd.buy_price,
                &cmd.sell_price,
                &cmd.order_size,
                &cmd.order_type,
                "",
                Vec::new(),
                false,
                true,
            ) {
                // ghosts come back as Ok(None); both count as applied
                Ok(_) => applied += 1,
                Err(e) => warn!(line, %e, "skipping bad setorder line"),
            }
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_active_line() {
        let cmd = parse_setorder_line("setorder X-Y buy 0.00001000 0.00002000 0.001 active")
            .unwrap()
            .unwrap();
        assert_eq!(cmd.market, "X-Y");
        assert_eq!(cmd.side, Side::Buy);
        assert_eq!(cmd.order_type, "active");
    }

    #[test]
    fn parses_alternate_size_field() {
        let cmd = parse_setorder_line("setorder X-Y sell 0.001 0.002 0.001/0.002 ghost")
            .unwrap()
            .unwrap();
        assert_eq!(cmd.order_size, "0.001/0.002");
        assert_eq!(cmd.order_type, "ghost");
    }

    #[test]
    fn skips_blank_and_comment_lines() {
        assert!(parse_setorder_line("").unwrap().is_none());
        assert!(parse_setorder_line("# comment").unwrap().is_none());
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(parse_setorder_line("setorder X-Y buy 1 2 3").is_err());
        assert!(parse_setorder_line("setorder X-Y hold 1 2 3 active").is_err());
        assert!(parse_setorder_line("setorder X-Y buy 1 2 3 pending").is_err());
    }
}
