//! The pilot status state machine.

use pilotgrid_core::PilotStatus;

/// Decide the next status from one remote observation.
///
/// `unknown_age` is the time in seconds since the pilot's last recorded
/// status change; it only matters when both sides report `Unknown`, where
/// remote flakiness is tolerated until `grace` seconds have passed.
///
/// Returns `None` when no transition (and therefore no registry write)
/// should happen. Final states never transition.
pub fn next_status(
    old: PilotStatus,
    remote: PilotStatus,
    unknown_age: u64,
    grace: u64,
) -> Option<PilotStatus> {
    if old.is_final() {
        return None;
    }

    if remote == PilotStatus::Unknown {
        if old == PilotStatus::Unknown {
            // Remote has been silent the whole grace window: give up.
            if unknown_age >= grace {
                return Some(PilotStatus::Aborted);
            }
            return None;
        }
        return Some(PilotStatus::Unknown);
    }

    if remote == old {
        return None;
    }

    Some(remote)
}
