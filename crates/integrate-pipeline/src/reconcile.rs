use crate::config::SpacegroupDecider;
use crate::deck::ParameterDeck;
use crate::spacegroup::bravais_for;
use crate::xds_output::idxref_cell;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Reconciliation {
    Agree { number: u32 },
    KeepXds { xds: u32, pointless: u32 },
    AdoptPointless { from: u32, to: u32, cell: [f64; 6] },
}

impl Reconciliation {
    pub fn agreed(&self) -> bool {
        matches!(self, Reconciliation::Agree { .. })
    }

    /// True when the deck now carries a different symmetry and the
    /// correction phase must be re-run.
    pub fn changed_deck(&self) -> bool {
        matches!(self, Reconciliation::AdoptPointless { .. })
    }
}

/// Compares the XDS spacegroup against the scaling tool's and, when the
/// decider prefers the latter, rewrites the symmetry directives.
///
/// `cell` is the scaling tool's refined cell. Without one the XDS
/// assignment is kept, since the deck cannot be rewritten consistently.
pub fn reconcile(
    xds: u32,
    pointless: u32,
    cell: Option<[f64; 6]>,
    decider: SpacegroupDecider,
    deck: &mut ParameterDeck,
) -> Reconciliation {
    if xds == pointless {
        return Reconciliation::Agree { number: xds };
    }
    match cell {
        Some(cell) if decider.prefers_pointless() => {
            set_symmetry(deck, pointless, &cell);
            Reconciliation::AdoptPointless {
                from: xds,
                to: pointless,
                cell,
            }
        }
        _ => Reconciliation::KeepXds { xds, pointless },
    }
}

/// Forces a user-supplied spacegroup, taking the cell from the matching
/// lattice in `IDXREF.LP`. Returns the cell, or `None` when the lattice was
/// not among the indexing solutions.
pub fn force_spacegroup(deck: &mut ParameterDeck, number: u32, idxref_lp: &str) -> Option<[f64; 6]> {
    let bravais = bravais_for(number)?;
    let cell = idxref_cell(idxref_lp, bravais)?;
    set_symmetry(deck, number, &cell);
    Some(cell)
}

fn set_symmetry(deck: &mut ParameterDeck, number: u32, cell: &[f64; 6]) {
    deck.upsert(format!("SPACE_GROUP_NUMBER={number}"));
    let constants: Vec<String> = cell.iter().map(|value| format!("{value:.2}")).collect();
    deck.upsert(format!("UNIT_CELL_CONSTANTS={}", constants.join(" ")));
}
