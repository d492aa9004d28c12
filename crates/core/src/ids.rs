#![forbid(unsafe_code)]

use std::cell::Cell;

use crate::time::now_ms;

/// Mint an id of the form `<prefix>_<unix_ms>_<4 hex>`. The millisecond
/// component keeps ids roughly sortable by creation time; the hex suffix
/// disambiguates ids minted within the same millisecond.
pub fn gen_id(prefix: &str) -> String {
    format!("{}_{}_{:04x}", prefix, now_ms(), rand_u16())
}

// xorshift64 seeded per thread from time + thread id, so concurrent request
// threads produce distinct suffix sequences without a PRNG dependency.
fn rand_u16() -> u16 {
    thread_local! {
        static STATE: Cell<u64> = Cell::new({
            let tid = std::thread::current().id();
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos() as u64;
            let mut seed =
                now ^ (format!("{tid:?}").len() as u64).wrapping_mul(0x517c_c1b7_2722_0a95);
            if seed == 0 {
                seed = 1;
            }
            seed
        });
    }

    STATE.with(|cell| {
        let mut s = cell.get();
        s ^= s << 13;
        s ^= s >> 7;
        s ^= s << 17;
        cell.set(s);
        (s & 0xffff) as u16
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_prefix_and_are_unique() {
        let a = gen_id("issue");
        let b = gen_id("issue");
        assert!(a.starts_with("issue_"));
        assert_ne!(a, b);
        let parts: Vec<&str> = a.splitn(3, '_').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 4);
    }
}
