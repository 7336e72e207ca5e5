//! Recognises the start-up banner the PIC firmware prints.

use crate::programmer::pic::Processor;

/// Kind of firmware running on the PIC
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Firmware {
    Gateway,
    Diagnostics,
    Interface,
}

const BANNERS: [(&str, Firmware, u32); 3] = [
    ("OpenTherm Gateway ", Firmware::Gateway, 6),
    ("Opentherm gateway diagnostics - Version ", Firmware::Diagnostics, 2),
    ("OpenTherm Interface ", Firmware::Interface, 2),
];

impl Firmware {
    pub fn name(self) -> &'static str {
        match self {
            Firmware::Gateway => "gateway",
            Firmware::Diagnostics => "diagnostics",
            Firmware::Interface => "interface",
        }
    }

    /// Guess the processor from the firmware version. Releases before the
    /// per-firmware threshold only existed for the PIC16F88.
    pub fn processor(self, version: &str) -> Option<Processor> {
        let major = version
            .split(|c: char| !c.is_ascii_digit())
            .next()
            .and_then(|m| m.parse::<u32>().ok())?;
        let threshold = BANNERS.iter().find(|b| b.1 == self).map(|b| b.2)?;
        if major < threshold {
            Some(Processor::Pic16f88)
        } else {
            Some(Processor::Pic16f1847)
        }
    }
}

/// Tracks which firmware the PIC reported most recently
#[derive(Clone, Debug, Default)]
pub struct BannerMatcher {
    current: Option<(Firmware, String)>,
}

impl BannerMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check a text line for a banner, returning the firmware when found
    pub fn feed_line(&mut self, line: &str) -> Option<(Firmware, String)> {
        let (firmware, rest) = BANNERS
            .iter()
            .find_map(|(prefix, fw, _)| line.find(prefix).map(|i| (*fw, &line[i + prefix.len()..])))?;

        let version = rest.split_whitespace().next()?.to_string();
        debug!("{} firmware version {}", firmware.name(), version);

        self.current = Some((firmware, version.clone()));
        Some((firmware, version))
    }

    pub fn current(&self) -> Option<(Firmware, &str)> {
        self.current.as_ref().map(|(f, v)| (*f, v.as_str()))
    }

    /// Version of the gateway firmware, if that is what the PIC runs
    pub fn gateway_version(&self) -> Option<&str> {
        match &self.current {
            Some((Firmware::Gateway, v)) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn clear(&mut self) {
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_banner() {
        let mut m = BannerMatcher::new();
        assert!(m.feed_line("B40000200").is_none());
        assert_eq!(
            m.feed_line("OpenTherm Gateway 6.4"),
            Some((Firmware::Gateway, "6.4".to_string()))
        );
        assert_eq!(m.gateway_version(), Some("6.4"));

        m.feed_line("Opentherm gateway diagnostics - Version 1.0");
        assert_eq!(m.current(), Some((Firmware::Diagnostics, "1.0")));
        assert_eq!(m.gateway_version(), None);
    }

    #[test]
    fn processor_from_version() {
        assert_eq!(Firmware::Gateway.processor("5.1"), Some(Processor::Pic16f88));
        assert_eq!(Firmware::Gateway.processor("6.0"), Some(Processor::Pic16f1847));
        assert_eq!(Firmware::Interface.processor("2.3"), Some(Processor::Pic16f1847));
        assert_eq!(Firmware::Diagnostics.processor("1.2"), Some(Processor::Pic16f88));
        assert_eq!(Firmware::Gateway.processor("x"), None);
    }
}
