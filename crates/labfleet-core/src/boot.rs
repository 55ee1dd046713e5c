//! Network boot configuration handed to the boot service

use serde::{Deserialize, Serialize};

/// What a device should boot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootConfig {
    pub kernel: String,
    pub initrd: String,
    pub cmdline: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtb: Option<String>,
}

/// Boot configuration used when no job runner provides one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootDefaults {
    #[serde(default = "default_kernel")]
    pub kernel: String,
    #[serde(default = "default_initrd")]
    pub initrd: String,
    #[serde(default)]
    pub cmdline: String,
}

fn default_kernel() -> String {
    "boot/default_kernel".to_string()
}

fn default_initrd() -> String {
    "boot/default_boot2container.cpio.xz".to_string()
}

impl Default for BootDefaults {
    fn default() -> Self {
        Self {
            kernel: default_kernel(),
            initrd: default_initrd(),
            cmdline: String::new(),
        }
    }
}

impl BootDefaults {
    #[must_use]
    pub fn to_config(&self) -> BootConfig {
        BootConfig {
            kernel: self.kernel.clone(),
            initrd: self.initrd.clone(),
            cmdline: self.cmdline.clone(),
            dtb: None,
        }
    }
}

/// Platform description a booting device sends along
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootQuery {
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub buildarch: Option<String>,
    #[serde(default)]
    pub bootloader: Option<String>,
}
