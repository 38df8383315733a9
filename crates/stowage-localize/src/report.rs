use std::ops::AddAssign;

use serde::Serialize;
use stowage_types::Uri;

use crate::manifest::Manifest;

/// Counters for one localization call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LocalizeReport {
    /// Objects physically copied or written.
    pub transfers: usize,
    /// Writes avoided because the destination already matched.
    pub skips: usize,
    /// Structured documents whose references were substituted.
    pub rewritten: usize,
    /// References resolved to presigned URLs.
    pub presigned: usize,
    /// Stale lock markers removed while acquiring.
    pub stale_overrides: usize,
}

impl AddAssign for LocalizeReport {
    fn add_assign(&mut self, rhs: Self) {
        self.transfers += rhs.transfers;
        self.skips += rhs.skips;
        self.rewritten += rhs.rewritten;
        self.presigned += rhs.presigned;
        self.stale_overrides += rhs.stale_overrides;
    }
}

/// Outcome of [`Localizer::localize`](crate::Localizer::localize).
#[derive(Clone, Debug)]
pub struct Localized {
    /// Localized URI of the top-level source.
    pub uri: Uri,
    pub manifest: Manifest,
    pub report: LocalizeReport,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_accumulate() {
        let mut total = LocalizeReport::default();
        total += LocalizeReport {
            transfers: 1,
            skips: 2,
            ..Default::default()
        };
        total += LocalizeReport {
            transfers: 1,
            stale_overrides: 1,
            ..Default::default()
        };
        assert_eq!(total.transfers, 2);
        assert_eq!(total.skips, 2);
        assert_eq!(total.stale_overrides, 1);
    }
}
