use core::fmt;

use sha2::{Digest, Sha256};

use crate::error::ArchiveError;
use crate::file::MetallibFile;
use crate::fourcc::FourCC;
use crate::header::LibraryInfo;

/// Function kind stored in the `TYPE` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    /// Vertex shader.
    Vertex,
    /// Fragment shader.
    Fragment,
    /// Compute kernel.
    Kernel,
    /// Function without a stage qualifier.
    Unqualified,
    /// `[[visible]]` function.
    Visible,
    /// Extern function.
    Extern,
    /// Ray-tracing intersection function.
    Intersection,
    /// Mesh shader.
    Mesh,
    /// Object shader.
    Object,
    /// A kind this crate does not know; preserved as-is.
    Other(u8),
}

impl ModuleKind {
    /// Decodes a `TYPE` tag byte.
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Vertex,
            1 => Self::Fragment,
            2 => Self::Kernel,
            3 => Self::Unqualified,
            4 => Self::Visible,
            5 => Self::Extern,
            6 => Self::Intersection,
            7 => Self::Mesh,
            8 => Self::Object,
            other => Self::Other(other),
        }
    }

    /// Encodes the kind as a `TYPE` tag byte.
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Vertex => 0,
            Self::Fragment => 1,
            Self::Kernel => 2,
            Self::Unqualified => 3,
            Self::Visible => 4,
            Self::Extern => 5,
            Self::Intersection => 6,
            Self::Mesh => 7,
            Self::Object => 8,
            Self::Other(raw) => raw,
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vertex => f.write_str("vertex"),
            Self::Fragment => f.write_str("fragment"),
            Self::Kernel => f.write_str("kernel"),
            Self::Unqualified => f.write_str("unqualified"),
            Self::Visible => f.write_str("visible"),
            Self::Extern => f.write_str("extern"),
            Self::Intersection => f.write_str("intersection"),
            Self::Mesh => f.write_str("mesh"),
            Self::Object => f.write_str("object"),
            Self::Other(raw) => write!(f, "type-{raw}"),
        }
    }
}

/// AIR and Metal language versions recorded in the `VERS` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AirVersion {
    /// AIR version, major.
    pub air_major: u16,
    /// AIR version, minor.
    pub air_minor: u16,
    /// Metal language version, major.
    pub language_major: u16,
    /// Metal language version, minor.
    pub language_minor: u16,
}

impl fmt::Display for AirVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "air {}.{}, metal {}.{}",
            self.air_major, self.air_minor, self.language_major, self.language_minor
        )
    }
}

/// An uninterpreted function list tag, preserved across unpack/pack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// Tag identifier.
    pub name: FourCC,
    /// Raw payload.
    pub data: Vec<u8>,
}

/// One module of a Metal library, owning its payload.
#[derive(Clone, PartialEq, Eq)]
pub struct Module {
    /// Unique function name.
    pub name: String,
    /// Function kind.
    pub kind: ModuleKind,
    /// Versions from the `VERS` tag, if the container carried one.
    pub air_version: Option<AirVersion>,
    /// Public metadata block (tag list ending in `ENDT`).
    pub public_metadata: Vec<u8>,
    /// Private metadata block (tag list ending in `ENDT`).
    pub private_metadata: Vec<u8>,
    /// Tags carried through without interpretation.
    pub extra_tags: Vec<Tag>,
    /// AIR payload.
    pub bytes: Vec<u8>,
}

impl Module {
    /// A module with empty (`ENDT`-only) metadata blocks and no version tag.
    pub fn new(name: impl Into<String>, kind: ModuleKind, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            kind,
            air_version: None,
            public_metadata: FourCC::ENDT.0.to_vec(),
            private_metadata: FourCC::ENDT.0.to_vec(),
            extra_tags: Vec::new(),
            bytes,
        }
    }

    /// Returns a copy of this module with its payload replaced.
    ///
    /// Metadata, version and extra tags are kept; the content hash is recomputed on pack.
    pub fn with_bytes(&self, bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            ..self.clone()
        }
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("air_version", &self.air_version)
            .field("extra_tags", &self.extra_tags.len())
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// An unpacked Metal library: container metadata plus modules in table order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metallib {
    /// Container-level metadata.
    pub info: LibraryInfo,
    /// Header extension group (`HDYN`, `VLST`, `UUID`, ...) written after the last entry,
    /// kept byte for byte.
    pub extension: Vec<u8>,
    modules: Vec<Module>,
}

impl Metallib {
    /// An empty library.
    pub fn new(info: LibraryInfo) -> Self {
        Self {
            info,
            extension: Vec::new(),
            modules: Vec::new(),
        }
    }

    /// Builds a library from `modules`, rejecting duplicate names.
    pub fn from_modules(
        info: LibraryInfo,
        modules: impl IntoIterator<Item = Module>,
    ) -> Result<Self, ArchiveError> {
        let mut lib = Self::new(info);
        for module in modules {
            lib.push(module)?;
        }
        Ok(lib)
    }

    /// Appends a module, rejecting duplicate names.
    pub fn push(&mut self, module: Module) -> Result<(), ArchiveError> {
        if self.get(&module.name).is_some() {
            return Err(ArchiveError::malformed(format!(
                "duplicate module name {:?}",
                module.name
            )));
        }
        self.modules.push(module);
        Ok(())
    }

    /// Modules in table order.
    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    /// Looks a module up by name.
    pub fn get(&self, name: &str) -> Option<&Module> {
        self.modules.iter().find(|module| module.name == name)
    }

    /// Module names in table order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.modules.iter().map(|module| module.name.as_str())
    }

    /// Number of modules.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Returns `true` if the library holds no modules.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Consumes the library, returning its modules in table order.
    pub fn into_modules(self) -> Vec<Module> {
        self.modules
    }
}

/// Parses `bytes` and copies every module out into an owned [`Metallib`].
pub fn unpack(bytes: &[u8]) -> Result<Metallib, ArchiveError> {
    let file = MetallibFile::parse(bytes)?;
    let mut lib = Metallib::new(file.header().info);
    lib.extension = file.extension().to_vec();

    for entry in file.entries() {
        if let Some(expected) = entry.hash {
            let actual: [u8; 32] = Sha256::digest(entry.bytes).into();
            if actual != expected {
                tracing::debug!(module = entry.name, "HASH tag does not match payload");
            }
        }

        lib.modules.push(Module {
            name: entry.name.to_owned(),
            kind: entry.kind,
            air_version: entry.air_version,
            public_metadata: entry.public_metadata.to_vec(),
            private_metadata: entry.private_metadata.to_vec(),
            extra_tags: entry
                .extra_tags
                .iter()
                .map(|(name, data)| Tag {
                    name: *name,
                    data: data.to_vec(),
                })
                .collect(),
            bytes: entry.bytes.to_vec(),
        });
    }

    Ok(lib)
}
