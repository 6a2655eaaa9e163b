//! Deterministic cohort assignment.

use citadel_core::digest::sha256;

/// Cohort bucket in `0..100` for a node and update.
///
/// `bucket = uint32_be(sha256(update_id ":" system_id)[0..4]) % 100`.
/// This is the invariant that makes percentage rollouts stable: the same
/// `(update_id, system_id)` pair yields the same bucket everywhere.
pub fn cohort_bucket(update_id: &str, system_id: &str) -> u32 {
    let digest = sha256(format!("{update_id}:{system_id}").as_bytes());
    let prefix = [digest[0], digest[1], digest[2], digest[3]];
    u32::from_be_bytes(prefix) % 100
}

/// Stable machine identifier for cohort assignment.
///
/// Prefers `/etc/machine-id`; falls back to the SHA-256 of the hostname so
/// the value is still deterministic on systems without one.
pub fn system_id() -> String {
    if let Ok(machine_id) = std::fs::read_to_string("/etc/machine-id") {
        let machine_id = machine_id.trim();
        if !machine_id.is_empty() {
            return machine_id.to_string();
        }
    }
    let hostname = hostname_fallback();
    hex::encode(sha256(hostname.as_bytes()))
}

fn hostname_fallback() -> String {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .map(|name| name.trim().to_string())
        .unwrap_or_else(|_| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_is_deterministic() {
        for i in 0..50 {
            let sid = format!("machine-{i}");
            let first = cohort_bucket("U1", &sid);
            assert_eq!(first, cohort_bucket("U1", &sid));
            assert!(first < 100);
        }
    }

    #[test]
    fn test_bucket_varies_with_update_id() {
        // Different updates shuffle the cohorts; at least one of a handful
        // of machines must land in a different bucket.
        let moved = (0..20).any(|i| {
            let sid = format!("machine-{i}");
            cohort_bucket("U1", &sid) != cohort_bucket("U2", &sid)
        });
        assert!(moved);
    }

    #[test]
    fn test_bucket_distribution_roughly_uniform() {
        // With 10k synthetic ids, ~1% (±0.5%) should land under bucket 1.
        let in_canary = (0..10_000)
            .filter(|i| cohort_bucket("U1", &format!("host-{i}")) < 1)
            .count();
        assert!((50..=150).contains(&in_canary), "canary share: {in_canary}");
    }

    #[test]
    fn test_system_id_is_stable() {
        assert_eq!(system_id(), system_id());
        assert!(!system_id().is_empty());
    }
}
