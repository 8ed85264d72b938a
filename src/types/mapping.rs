//! Mapping dimensions and the mapping-error taxonomy
//!
//! A staged row carries distributor codes for four dimensions (branch,
//! salesman, customer, product). Each dimension is resolved through its own
//! cross-reference table. Rows that cannot be resolved are classified by the
//! first failing entry of [`MAPPING_CHECKS`].

use serde::{Deserialize, Serialize};

/// Reason a staged row could not be turned into a fact row
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MappingErrorReason {
    BranchNotMapped,
    SalesmanNotMapped,
    CustomerNotMapped,
    ProductNotMapped,
    CustomerNotFoundInMasterPrc,
    ProductNotFoundInProductGroup,
    BranchCodeNotFoundInMaster,
    UnknownMappingError,
}

impl MappingErrorReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MappingErrorReason::BranchNotMapped => "BRANCH_NOT_MAPPED",
            MappingErrorReason::SalesmanNotMapped => "SALESMAN_NOT_MAPPED",
            MappingErrorReason::CustomerNotMapped => "CUSTOMER_NOT_MAPPED",
            MappingErrorReason::ProductNotMapped => "PRODUCT_NOT_MAPPED",
            MappingErrorReason::CustomerNotFoundInMasterPrc => "CUSTOMER_NOT_FOUND_IN_MASTER_PRC",
            MappingErrorReason::ProductNotFoundInProductGroup => {
                "PRODUCT_NOT_FOUND_IN_PRODUCT_GROUP"
            }
            MappingErrorReason::BranchCodeNotFoundInMaster => "BRANCH_CODE_NOT_FOUND_IN_MASTER",
            MappingErrorReason::UnknownMappingError => "UNKNOWN_MAPPING_ERROR",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        std::iter::once(MappingErrorReason::UnknownMappingError)
            .chain(MAPPING_CHECKS.iter().map(|c| c.reason))
            .find(|r| r.as_str() == s)
    }
}

/// What the resolver found for one unmoved staged row
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MappingLookup {
    pub branch_mapped: bool,
    pub salesman_mapped: bool,
    pub customer_mapped: bool,
    pub product_mapped: bool,
    pub customer_in_master: bool,
    pub product_in_group: bool,
    pub branch_in_master: bool,
}

impl MappingLookup {
    /// All lookups resolve
    #[cfg(test)]
    pub fn is_resolvable(&self) -> bool {
        classify_failure(self).is_none()
    }
}

/// A named predicate over a lookup result; `fails` returns true when the check fails
#[derive(Clone, Copy)]
pub struct MappingCheck {
    pub reason: MappingErrorReason,
    pub fails: fn(&MappingLookup) -> bool,
}

fn branch_not_mapped(p: &MappingLookup) -> bool {
    !p.branch_mapped
}

fn salesman_not_mapped(p: &MappingLookup) -> bool {
    !p.salesman_mapped
}

fn customer_not_mapped(p: &MappingLookup) -> bool {
    !p.customer_mapped
}

fn product_not_mapped(p: &MappingLookup) -> bool {
    !p.product_mapped
}

fn customer_missing_in_master(p: &MappingLookup) -> bool {
    p.customer_mapped && !p.customer_in_master
}

fn product_missing_in_group(p: &MappingLookup) -> bool {
    p.product_mapped && !p.product_in_group
}

fn branch_missing_in_master(p: &MappingLookup) -> bool {
    p.branch_mapped && !p.branch_in_master
}

/// Checks in priority order. The first failing check names the error.
pub const MAPPING_CHECKS: [MappingCheck; 7] = [
    MappingCheck { reason: MappingErrorReason::BranchNotMapped, fails: branch_not_mapped },
    MappingCheck { reason: MappingErrorReason::SalesmanNotMapped, fails: salesman_not_mapped },
    MappingCheck { reason: MappingErrorReason::CustomerNotMapped, fails: customer_not_mapped },
    MappingCheck { reason: MappingErrorReason::ProductNotMapped, fails: product_not_mapped },
    MappingCheck {
        reason: MappingErrorReason::CustomerNotFoundInMasterPrc,
        fails: customer_missing_in_master,
    },
    MappingCheck {
        reason: MappingErrorReason::ProductNotFoundInProductGroup,
        fails: product_missing_in_group,
    },
    MappingCheck {
        reason: MappingErrorReason::BranchCodeNotFoundInMaster,
        fails: branch_missing_in_master,
    },
];

fn classify_failure(lookup: &MappingLookup) -> Option<MappingErrorReason> {
    MAPPING_CHECKS
        .iter()
        .find(|check| (check.fails)(lookup))
        .map(|check| check.reason)
}

/// Classify a row that was left behind by the resolver.
///
/// A row that passes every check still ended up unresolved, which is
/// reported as [`MappingErrorReason::UnknownMappingError`].
pub fn classify(lookup: &MappingLookup) -> MappingErrorReason {
    classify_failure(lookup).unwrap_or(MappingErrorReason::UnknownMappingError)
}

/// Signature the staging store uses to classify drained rows
pub type Classifier = fn(&MappingLookup) -> MappingErrorReason;
