//! Carrying user settings across a firmware upgrade.
//!
//! Each firmware version keeps its settings at its own EEPROM addresses.
//! A transfer table lists, per setting id, where a version stores it:
//!
//! ```text
//! # id minver addr size mask
//! 0  4.0 01 1 00
//! 1  5.3 02 2 00
//! 1  6.0 05 2 80
//! ```
//!
//! `addr` and `mask` are hex, `size` decimal. Later lines override earlier
//! ones for versions new enough. An address beyond the EEPROM injects the
//! low byte of the address as a constant. Mask bits set to 1 keep the old
//! firmware's bit, bits set to 0 keep the new image's default.

use std::cmp::Ordering;
use std::path::Path;

const SETTINGS_MAX: usize = 16;

/// Compare dotted firmware version strings such as `4.2`, `4.2.5` or
/// `5.0a3`. At the first differing separator an `a` (alpha) sorts lowest,
/// then `b` (beta), then the end of the string, then a further numeric
/// component.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let (mut a, mut b) = (a.as_bytes(), b.as_bytes());

    while !a.is_empty() && !b.is_empty() {
        let (n1, r1) = match leading_number(a) {
            Some(v) => v,
            None => return Ordering::Equal,
        };
        let (n2, r2) = match leading_number(b) {
            Some(v) => v,
            None => return Ordering::Equal,
        };
        match n1.cmp(&n2) {
            Ordering::Equal => (),
            o => return o,
        }

        let (c1, c2) = (r1.first().copied(), r2.first().copied());
        if c1 != c2 {
            return match (c1, c2) {
                (Some(b'a'), _) => Ordering::Less,
                (_, Some(b'a')) => Ordering::Greater,
                (Some(b'b'), _) => Ordering::Less,
                (_, Some(b'b')) => Ordering::Greater,
                (None, _) => Ordering::Less,
                (_, None) => Ordering::Greater,
                // Unknown separators compare as equal
                _ => Ordering::Equal,
            };
        }

        a = r1.get(1..).unwrap_or(&[]);
        b = r2.get(1..).unwrap_or(&[]);
    }

    Ordering::Equal
}

fn leading_number(s: &[u8]) -> Option<(u32, &[u8])> {
    let n = s.iter().take_while(|c| c.is_ascii_digit()).count();
    if n == 0 {
        return None;
    }
    let v = s[..n]
        .iter()
        .fold(0u32, |v, c| v.saturating_mul(10).saturating_add((c - b'0') as u32));
    Some((v, &s[n..]))
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Setting {
    pub addr: u16,
    pub size: u8,
    pub mask: u8,
}

/// Setting locations for one firmware version
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransferTable {
    settings: [Option<Setting>; SETTINGS_MAX],
}

impl TransferTable {
    /// Collect the entries of `text` applicable to `version`
    pub fn parse(text: &str, version: &str) -> Self {
        let mut table = Self::default();

        for line in text.lines() {
            let f: Vec<&str> = line.split_whitespace().collect();
            if f.len() < 5 {
                continue;
            }
            let id = match f[0].parse::<usize>() {
                Ok(id) => id,
                Err(_) => continue,
            };
            if id >= SETTINGS_MAX {
                break;
            }
            let parsed = (
                u16::from_str_radix(f[2], 16),
                f[3].parse::<u8>(),
                u8::from_str_radix(f[4], 16),
            );
            let (addr, size, mask) = match parsed {
                (Ok(a), Ok(s), Ok(m)) => (a, s, m),
                _ => {
                    debug!("ignoring transfer line '{}'", line);
                    continue;
                }
            };
            if compare_versions(version, f[1]) == Ordering::Less {
                continue;
            }
            table.settings[id] = Some(Setting { addr, size, mask });
        }

        table
    }

    /// Read the table for `version` from a file; a missing file gives an
    /// empty table
    pub fn load<P: AsRef<Path>>(path: P, version: &str) -> Self {
        match std::fs::read_to_string(path.as_ref()) {
            Ok(text) => Self::parse(&text, version),
            Err(e) => {
                info!("no settings transfer ({}: {})", path.as_ref().display(), e);
                Self::default()
            }
        }
    }

    pub fn get(&self, id: usize) -> Option<Setting> {
        self.settings.get(id).copied().flatten()
    }

    fn last(&self) -> Option<usize> {
        self.settings.iter().rposition(|s| s.is_some())
    }
}

/// Merge the settings stored in `old_eeprom` by the firmware described by
/// `old` into `image`, the EEPROM contents of the new firmware. Returns the
/// number of bytes touched.
///
/// A mask bit of 1 takes that bit from the old firmware, 0 keeps the new
/// default. The `transfer.dat` files distributed with the PIC firmware
/// use the opposite polarity (a 1 keeps the new bit), so their masks have
/// to be inverted before use here.
pub fn transfer_settings(
    old: &TransferTable,
    new: &TransferTable,
    old_eeprom: &[u8],
    image: &mut [u8],
) -> usize {
    let last = match (old.last(), new.last()) {
        (Some(a), Some(b)) => a.min(b),
        _ => return 0,
    };

    let mut touched = 0;
    for id in 0..=last {
        let (o, n) = match (old.get(id), new.get(id)) {
            (Some(o), Some(n)) => (o, n),
            _ => continue,
        };
        if n.addr as usize >= image.len() {
            continue;
        }
        let mask = o.mask | n.mask;

        for i in 0..o.size.min(n.size) as usize {
            let value = if (o.addr as usize) < old_eeprom.len() {
                match old_eeprom.get(o.addr as usize + i) {
                    Some(v) => *v,
                    None => break,
                }
            } else {
                o.addr as u8
            };
            let dst = match image.get_mut(n.addr as usize + i) {
                Some(d) => d,
                None => break,
            };
            *dst = (value & mask) | (*dst & !mask);
            touched += 1;
        }
    }

    debug!("transferred {} setting bytes", touched);
    touched
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_ordering() {
        use Ordering::*;
        assert_eq!(compare_versions("4.2", "4.2"), Equal);
        assert_eq!(compare_versions("4.2", "4.10"), Less);
        assert_eq!(compare_versions("5.0", "4.9"), Greater);
        assert_eq!(compare_versions("4.2", "4.2.1"), Less);
        assert_eq!(compare_versions("4.2.1", "4.2"), Greater);
        assert_eq!(compare_versions("4.2a1", "4.2b1"), Less);
        assert_eq!(compare_versions("4.2b1", "4.2"), Less);
        assert_eq!(compare_versions("4.2", "4.2a3"), Greater);
        assert_eq!(compare_versions("5.0a2", "5.0a10"), Less);
    }

    const TABLE: &str = "\
# settings
0 4.0 01 1 00
1 4.0 02 2 00
1 6.0 05 2 ff
2 4.0 120 1 ff
16 1.0 30 1 00
3 1.0 31 1 00
";

    #[test]
    fn table_by_version() {
        let t = TransferTable::parse(TABLE, "5.8");
        assert_eq!(t.get(1), Some(Setting { addr: 2, size: 2, mask: 0 }));
        assert_eq!(t.get(3), None);

        let t = TransferTable::parse(TABLE, "6.0");
        assert_eq!(t.get(1), Some(Setting { addr: 5, size: 2, mask: 0xff }));
        assert_eq!(t.get(2), Some(Setting { addr: 0x120, size: 1, mask: 0xff }));

        let t = TransferTable::parse(TABLE, "3.9");
        assert_eq!(t.get(0), None);
    }

    #[test]
    fn mask_selects_old_bits() {
        let mut old = TransferTable::default();
        old.settings[0] = Some(Setting { addr: 0x10, size: 1, mask: 0x0f });
        let mut new = TransferTable::default();
        new.settings[0] = Some(Setting { addr: 0x20, size: 1, mask: 0x00 });

        let mut eeprom = [0u8; 256];
        eeprom[0x10] = 0xab;
        let mut image = [0xffu8; 256];
        image[0x20] = 0x34;

        assert_eq!(transfer_settings(&old, &new, &eeprom, &mut image), 1);
        assert_eq!(image[0x20], 0x3b);
    }

    #[test]
    fn constant_injection_and_missing_ids() {
        let old = TransferTable::parse(TABLE, "6.0");
        let new = TransferTable::parse("0 1.0 40 1 00\n2 1.0 41 1 00\n", "6.1");

        let eeprom = [0x5au8; 256];
        let mut image = [0u8; 256];
        transfer_settings(&old, &new, &eeprom, &mut image);

        // id 0 mask 00 on both sides keeps the default
        assert_eq!(image[0x40], 0x00);
        // id 2 injects 0x20 from address 0x120
        assert_eq!(image[0x41], 0x20);
        // id 1 has no location in the new table
        assert!(image.iter().enumerate().all(|(i, b)| i == 0x41 || *b == 0));
    }

    #[test]
    fn missing_file_means_no_transfer() {
        let t = TransferTable::load("/nonexistent/transfer.dat", "6.0");
        assert_eq!(t, TransferTable::default());
        let mut image = [1u8; 256];
        assert_eq!(transfer_settings(&t, &t, &[0u8; 256], &mut image), 0);
    }
}
