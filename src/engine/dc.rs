//! Diverge/converge coordination.
//!
//! Converge collapses `order_dc` consecutive resting singletons into one
//! landmark order; diverge splits a landmark back into singletons when the
//! band shifts over it. Both are two-phase: cancel the group with reason
//! `Dc`, reserve the covered slot indices against auto-set, and place the
//! replacement only when every cancel in the group has been acknowledged.

use std::collections::HashMap;

use tracing::info;

use crate::engine::position::{CancelReason, Side};
use crate::engine::Engine;
use crate::market::{Market, SlotIndex};
use crate::transport::{PosId, Transport};

/// A pending cancel-group awaiting completion.
#[derive(Debug, Clone)]
pub struct DcGroup {
    /// Members still awaiting cancel acknowledgment.
    pub members: Vec<PosId>,
    /// Whether fulfillment places one landmark (true) or one singleton per
    /// index (false).
    pub will_be_landmark: bool,
    /// Slot indices the replacement will cover, sorted ascending.
    pub new_indices: Vec<SlotIndex>,
}

impl<T: Transport> Engine<T> {
    /// Whether a slot index is reserved by an in-flight DC group.
    pub fn is_index_diverging_converging(&self, market: &Market, index: SlotIndex) -> bool {
        self.dc_reserved
            .get(market)
            .is_some_and(|v| v.contains(&index))
    }

    fn reserve_index(&mut self, market: &Market, index: SlotIndex) {
        self.dc_reserved
            .entry(market.clone())
            .or_default()
            .push(index);
    }

    fn release_index(&mut self, market: &Market, index: SlotIndex) {
        if let Some(reserved) = self.dc_reserved.get_mut(market) {
            if let Some(i) = reserved.iter().position(|r| *r == index) {
                reserved.swap_remove(i);
            }
        }
    }

    /// Slow sweep: run maintenance and grace GC, then scan for singleton
    /// runs to converge and stranded landmarks to diverge.
    pub fn on_check_diverge_converge(&mut self) {
        self.check_maintenance();
        self.clean_grace_times();

        if self.transport.should_yield()
            || self.transport.queued_commands() >= self.settings.limit_commands_queued_dc_check
        {
            return;
        }

        // highest buy index per market defines where landmark territory ends
        let mut hi_buy_idx: HashMap<Market, SlotIndex> = HashMap::new();
        for pos in self.store.iter() {
            if pos.is_onetime || pos.side != Side::Buy {
                continue;
            }
            let idx = pos.highest_market_index();
            let entry = hi_buy_idx.entry(pos.market.clone()).or_insert(-1);
            if idx > *entry {
                *entry = idx;
            }
        }

        let mut converge_buys: HashMap<Market, Vec<SlotIndex>> = HashMap::new();
        let mut converge_sells: HashMap<Market, Vec<SlotIndex>> = HashMap::new();
        let mut diverge_buys: HashMap<Market, Vec<SlotIndex>> = HashMap::new();
        let mut diverge_sells: HashMap<Market, Vec<SlotIndex>> = HashMap::new();

        for pos in self.store.iter() {
            if pos.is_onetime {
                continue;
            }
            let market = &pos.market;
            let Some(info) = self.markets.get(market) else {
                continue;
            };
            if info.order_dc < 2 {
                continue;
            }

            let first_idx = pos.lowest_market_index();
            let eligible = !pos.is_cancelling
                && (self.settings.should_dc_slippage_orders || !pos.is_slippage)
                && !pos.order_number.is_empty()
                && !self.is_index_diverging_converging(market, first_idx);
            if !eligible {
                continue;
            }

            let boundary = hi_buy_idx.get(market).copied().unwrap_or(0);

            match pos.side {
                Side::Buy => {
                    if converge_buys.get(market).is_some_and(|v| v.contains(&first_idx))
                        || diverge_buys.get(market).is_some_and(|v| v.contains(&first_idx))
                    {
                        continue;
                    }
                    let buy_landmark_boundary = boundary - info.order_landmark_start;
                    let hi_idx = pos.highest_market_index();
                    if !pos.is_landmark && hi_idx < buy_landmark_boundary - info.order_dc_nice {
                        converge_buys.entry(market.clone()).or_default().push(first_idx);
                    } else if pos.is_landmark && hi_idx > buy_landmark_boundary {
                        diverge_buys.entry(market.clone()).or_default().push(first_idx);
                    }
                }
                Side::Sell => {
                    if converge_sells.get(market).is_some_and(|v| v.contains(&first_idx))
                        || diverge_sells.get(market).is_some_and(|v| v.contains(&first_idx))
                    {
                        continue;
                    }
                    let sell_landmark_boundary = boundary + 1 + info.order_landmark_start;
                    let lo_idx = pos.lowest_market_index();
                    if !pos.is_landmark && lo_idx > sell_landmark_boundary + info.order_dc_nice {
                        converge_sells.entry(market.clone()).or_default().push(first_idx);
                    } else if pos.is_landmark && lo_idx < sell_landmark_boundary {
                        diverge_sells.entry(market.clone()).or_default().push(first_idx);
                    }
                }
            }
        }

        self.converge(converge_buys, Side::Buy);
        self.converge(converge_sells, Side::Sell);
        self.diverge(diverge_buys);
        self.diverge(diverge_sells);
    }

    /// Collapse consecutive singleton runs into landmark groups: walk the
    /// candidate indices, and when a run reaches `order_dc`, cancel every
    /// member with reason `Dc` and reserve its indices. One converge per
    /// market per pass.
    pub(crate) fn converge(&mut self, market_map: HashMap<Market, Vec<SlotIndex>>, side: Side) {
        let index_offset: SlotIndex = if side == Side::Buy { 1 } else { -1 };

        for (market, mut indices) in market_map {
            let dc_value = self
                .markets
                .get(&market)
                .map(|i| i.order_dc)
                .unwrap_or(0);
            if (indices.len() as i64) < dc_value || dc_value < 2 {
                continue;
            }

            // buys walk low to high, sells high to low
            if side == Side::Buy {
                indices.sort_unstable();
            } else {
                indices.sort_unstable_by(|a, b| b.cmp(a));
            }

            let mut run: Vec<SlotIndex> = Vec::new();
            let mut j = 0usize;
            while j < indices.len() {
                let index = indices[j];

                if run.is_empty() {
                    run.push(index);
                } else if index == run[run.len() - 1] + index_offset {
                    run.push(index);
                } else {
                    // non-consecutive break: drop the head and restart
                    indices.remove(0);
                    run.clear();
                    if indices.is_empty() {
                        break;
                    }
                    j = 0;
                    continue;
                }

                if run.len() as i64 == dc_value {
                    let mut new_indices = run.clone();
                    new_indices.sort_unstable();
                    info!(%market, indices = ?new_indices, "converging");

                    let mut members = Vec::new();
                    for idx in &run {
                        let Some(id) = self.store.position_by_index(&market, *idx) else {
                            continue;
                        };
                        self.cancel_order(id, true, CancelReason::Dc);
                        members.push(id);
                        self.reserve_index(&market, *idx);
                    }
                    if !members.is_empty() {
                        self.dc_groups.push(DcGroup {
                            members,
                            will_be_landmark: true,
                            new_indices,
                        });
                    }

                    // one converge per market per pass
                    break;
                }

                j += 1;
            }

            if self.transport.should_yield()
                || self.transport.queued_commands()
                    >= self.settings.limit_commands_queued_dc_check
            {
                return;
            }
        }
    }

    /// Split stranded landmarks: cancel the lowest-index candidate landmark
    /// with reason `Dc` and reserve its span for singleton replacement.
    pub(crate) fn diverge(&mut self, market_map: HashMap<Market, Vec<SlotIndex>>) {
        for (market, mut indices) in market_map {
            if indices.is_empty() {
                continue;
            }
            indices.sort_unstable();

            let Some(id) = self.store.position_by_index(&market, indices[0]) else {
                continue;
            };
            let Some(pos) = self.store.get(id) else {
                continue;
            };
            let span = pos.market_indices.clone();
            info!(%market, indices = ?span, "diverging");

            self.cancel_order(id, true, CancelReason::Dc);
            for idx in &span {
                self.reserve_index(&market, *idx);
            }
            self.dc_groups.push(DcGroup {
                members: vec![id],
                will_be_landmark: false,
                new_indices: span,
            });

            if self.transport.should_yield()
                || self.transport.queued_commands()
                    >= self.settings.limit_commands_queued_dc_check
            {
                return;
            }
        }
    }

    /// A DC-group member's cancel completed. Detach it from its group; when
    /// the group empties, fulfill the reservation by placing the landmark
    /// or the singletons.
    pub(crate) fn cancel_order_meat_dc(&mut self, id: PosId) {
        let Some(group_idx) = self.dc_groups.iter().position(|g| g.members.contains(&id)) else {
            return;
        };
        let mut group = self.dc_groups.swap_remove(group_idx);
        group.members.retain(|m| *m != id);

        if !group.members.is_empty() {
            // still waiting on other members' cancels
            self.dc_groups.push(group);
            return;
        }

        let Some(pos) = self.store.get(id) else {
            return;
        };
        let market = pos.market.clone();
        let side = pos.side;

        if group.will_be_landmark {
            for idx in &group.new_indices {
                self.release_index(&market, *idx);
            }
            self.add_landmark_position_for(&market, side, &group.new_indices);
        } else {
            for idx in group.new_indices {
                self.release_index(&market, idx);

                // the index may have been cleared by a cancel-all
                let slot = self
                    .markets
                    .get(&market)
                    .filter(|info| !info.position_index.is_empty())
                    .and_then(|info| info.slot(idx))
                    .cloned();
                let Some(slot) = slot else {
                    continue;
                };
                if let Err(e) = self.add_position(
                    market.as_str(),
                    side,
                    &slot.buy_price.to_string(),
                    &slot.sell_price.to_string(),
                    &slot.size_field(),
                    "active",
                    "",
                    vec![idx],
                    false,
                    true,
                ) {
                    tracing::warn!(%market, idx, %e, "diverge replacement rejected");
                }
            }
        }
    }

    /// A position is being removed outside the DC ack path (fill or user
    /// cancel while its group is still in flight): abort the whole group
    /// and release its reservations together, so the pending replacement
    /// cannot overlay slots that are live again.
    pub(crate) fn remove_from_dc(&mut self, id: PosId) {
        let Some(group_idx) = self.dc_groups.iter().position(|g| g.members.contains(&id)) else {
            return;
        };
        let group = self.dc_groups.swap_remove(group_idx);
        let market = match self.store.get(id) {
            Some(pos) => pos.market.clone(),
            None => return,
        };
        for idx in &group.new_indices {
            self.release_index(&market, *idx);
        }
    }
}
