use core::fmt;

/// A four-character tag identifier (e.g. `NAME`, `MDSZ`, `ENDT`).
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    pub(crate) const NAME: FourCC = FourCC(*b"NAME");
    pub(crate) const TYPE: FourCC = FourCC(*b"TYPE");
    pub(crate) const HASH: FourCC = FourCC(*b"HASH");
    pub(crate) const MDSZ: FourCC = FourCC(*b"MDSZ");
    pub(crate) const OFFT: FourCC = FourCC(*b"OFFT");
    pub(crate) const VERS: FourCC = FourCC(*b"VERS");
    pub(crate) const ENDT: FourCC = FourCC(*b"ENDT");

    /// Returns `true` for tags whose payload is recomputed on pack.
    pub(crate) fn is_managed(self) -> bool {
        matches!(
            self,
            Self::NAME | Self::TYPE | Self::HASH | Self::MDSZ | Self::OFFT | Self::VERS | Self::ENDT
        )
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:02x}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCC(\"{self}\")")
    }
}
