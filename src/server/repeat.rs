//! The armed SEND_START repeat.
//!
//! Arming clones the profile: the repeat keeps transmitting from its own
//! copy, so a config reload can swap the active profile list without
//! pulling timing data out from under an in-flight repeat. On reload the
//! repeat either migrates to the matching profile in the new generation
//! or is disarmed; it never dangles into a retired one.

use std::time::{Duration, Instant};

use crate::remote::{ProfileSet, RemoteProfile};

/// State of the one repeat that can be active at a time.
#[derive(Debug, Clone)]
pub struct ActiveRepeat {
    /// Client that issued SEND_START; its disconnect disarms.
    pub owner: u64,
    pub remote: String,
    pub button: String,
    /// Private working copy of the profile, used for re-encoding.
    pub profile: RemoteProfile,
    pub entry: usize,
    /// Code position at arm time; if the active generation's entry
    /// drifts away from it, the repeat is abandoned rather than risk
    /// retransmitting the wrong code.
    pub code: Option<u64>,
    pub generation: u64,
    /// When the next retransmission is due.
    pub deadline: Instant,
    pub count: u32,
}

impl ActiveRepeat {
    /// Arm after a fresh transmission whose closing gap is `gap_us`.
    pub fn arm(
        owner: u64,
        profile: &RemoteProfile,
        entry: usize,
        generation: u64,
        gap_us: u64,
    ) -> Self {
        Self {
            owner,
            remote: profile.name.clone(),
            button: profile
                .codes
                .get(entry)
                .map(|c| c.name.clone())
                .unwrap_or_default(),
            profile: profile.clone(),
            entry,
            code: profile.codes.get(entry).and_then(|c| c.current_code()),
            generation,
            deadline: Instant::now() + Duration::from_micros(gap_us),
            count: 0,
        }
    }

    pub fn matches(&self, remote: &str, button: &str) -> bool {
        self.remote == remote && self.button == button
    }

    /// Schedule the next retransmission `gap_us` from now.
    pub fn rearm(&mut self, gap_us: u64) {
        self.deadline = Instant::now() + Duration::from_micros(gap_us);
        self.count = self.count.saturating_add(1);
    }

    /// Check the active generation still carries this exact repeat: same
    /// remote, same button, same code position.
    pub fn still_valid(&self, set: &ProfileSet) -> bool {
        set.find(&self.remote)
            .and_then(|p| p.find_entry(&self.button).map(|i| &p.codes[i]))
            .is_some_and(|entry| entry.current_code() == self.code)
    }

    /// Carry the repeat over to a freshly loaded generation. Timing
    /// comes from the new profile; press bookkeeping (toggle state,
    /// repeat count) survives from the working copy. Returns false when
    /// the new generation no longer has a matching entry, in which case
    /// the caller disarms.
    pub fn migrate(&mut self, set: &ProfileSet) -> bool {
        let Some(profile) = set.find(&self.remote) else {
            return false;
        };
        let Some(entry) = profile.find_entry(&self.button) else {
            return false;
        };
        if profile.codes[entry].current_code() != self.code {
            return false;
        }
        let mut fresh = profile.clone();
        fresh.state = self.profile.state.clone();
        self.profile = fresh;
        self.entry = entry;
        self.generation = set.generation;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::CodeEntry;

    fn profile() -> RemoteProfile {
        let mut p = RemoteProfile::default();
        p.name = "tv".to_string();
        p.gap = 50_000;
        p.codes.push(CodeEntry::numeric("POWER", 0x45));
        p
    }

    #[test]
    fn test_arm_captures_identity() {
        let rep = ActiveRepeat::arm(7, &profile(), 0, 3, 50_000);
        assert_eq!(rep.owner, 7);
        assert!(rep.matches("tv", "POWER"));
        assert!(!rep.matches("tv", "MUTE"));
        assert_eq!(rep.code, Some(0x45));
        assert_eq!(rep.generation, 3);
    }

    #[test]
    fn test_migrate_to_matching_generation() {
        let mut rep = ActiveRepeat::arm(1, &profile(), 0, 0, 50_000);
        rep.profile.state.repeat_count = 4;

        let mut set = ProfileSet::new(vec![profile()]);
        set.generation = 1;
        set.remotes[0].gap = 60_000;

        assert!(rep.migrate(&set));
        assert_eq!(rep.generation, 1);
        assert_eq!(rep.profile.gap, 60_000);
        // Press state survives the migration.
        assert_eq!(rep.profile.state.repeat_count, 4);
    }

    #[test]
    fn test_migrate_fails_when_entry_gone() {
        let mut rep = ActiveRepeat::arm(1, &profile(), 0, 0, 50_000);

        let mut renamed = profile();
        renamed.codes[0].name = "STANDBY".to_string();
        assert!(!rep.migrate(&ProfileSet::new(vec![renamed])));

        let mut recoded = profile();
        recoded.codes[0] = CodeEntry::numeric("POWER", 0x99);
        assert!(!rep.migrate(&ProfileSet::new(vec![recoded])));
        assert!(!rep.migrate(&ProfileSet::new(vec![])));
    }

    #[test]
    fn test_still_valid_tracks_code_drift() {
        let rep = ActiveRepeat::arm(1, &profile(), 0, 0, 50_000);
        let mut set = ProfileSet::new(vec![profile()]);
        assert!(rep.still_valid(&set));

        set.remotes[0].codes[0] = CodeEntry::numeric("POWER", 0x46);
        assert!(!rep.still_valid(&set));
    }
}
