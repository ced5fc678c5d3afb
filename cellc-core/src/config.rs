use serde::{Deserialize, Serialize};

/// Hardware registers below this are reserved ($0 link, $1 stack, $2 scratch).
pub const FIRST_ALLOCATABLE_REGISTER: u8 = 3;
pub const REGISTER_COUNT: u16 = 128;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Byte address of the first laid-out object.
    pub base_address: u32,
    pub first_argument_register: u8,
    pub argument_register_count: u8,
    /// Back chain and saved link register at the bottom of every frame.
    pub link_area_size: u32,
    pub local_store_size: u32,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            base_address: 0,
            first_argument_register: FIRST_ALLOCATABLE_REGISTER,
            argument_register_count: 72,
            link_area_size: 32,
            local_store_size: 256 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Parse(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Parse(message) => write!(f, "invalid options json: {message}"),
            ConfigError::Invalid(message) => write!(f, "invalid options: {message}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl CompileOptions {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let options: CompileOptions =
            serde_json::from_str(text).map_err(|err| ConfigError::Parse(err.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_address % 16 != 0 {
            return Err(ConfigError::Invalid(format!(
                "base_address {:#x} is not quadword aligned",
                self.base_address
            )));
        }
        if self.first_argument_register < FIRST_ALLOCATABLE_REGISTER {
            return Err(ConfigError::Invalid(format!(
                "first_argument_register ${} overlaps reserved registers",
                self.first_argument_register
            )));
        }
        let last = u16::from(self.first_argument_register) + u16::from(self.argument_register_count);
        if last > REGISTER_COUNT {
            return Err(ConfigError::Invalid(format!(
                "argument registers run past ${}",
                REGISTER_COUNT - 1
            )));
        }
        if self.link_area_size < 32 || self.link_area_size % 16 != 0 {
            return Err(ConfigError::Invalid(format!(
                "link_area_size {} must be a quadword multiple of at least 32",
                self.link_area_size
            )));
        }
        if self.local_store_size % 16 != 0 || self.local_store_size <= self.base_address {
            return Err(ConfigError::Invalid(format!(
                "local_store_size {:#x} does not fit base_address {:#x}",
                self.local_store_size, self.base_address
            )));
        }
        Ok(())
    }

    pub fn argument_register(&self, slot: usize) -> Option<u8> {
        if slot >= usize::from(self.argument_register_count) {
            return None;
        }
        Some(self.first_argument_register + slot as u8)
    }

    /// Register holding the return value.
    pub fn return_register(&self) -> u8 {
        self.first_argument_register
    }
}
