//! register-map: compiles YAML protocol descriptors into per-device lookup
//! tables and decodes/encodes values against raw transport responses.

mod point;
pub use point::{DataPointKey, Reading, ERROR_UNIT};

mod error;
pub use error::{CommError, ConfigError, DecodeError, EncodeError};

mod types;
pub use types::*;

pub mod selector;
pub use selector::Selector;

mod map;
pub use map::{
    ModbusAddress, RegisterEntry, RegisterMap, RestAddress, RestAuth, TransportAddress,
    TransportRequest,
};

mod loader;
pub use loader::{
    compile, compile_descriptor, declared_placeholders, load_descriptor_file,
    load_descriptors_dir, placeholder_token, substitute_placeholders, ConnectionParams,
    DescriptorLibrary,
};

mod decode;
pub use decode::{decode, registers_to_raw, RawResponse};

mod encode;
pub use encode::{encode_write, WriteCommand, VALUE_TOKEN};
