//! Module inventory and the fixed channel layout of a hardware snapshot.
//!
//! Every snapshot has the same width no matter which modules are installed:
//! 4 counter slots, 2 analog slots and 32 thermocouple slots (two groups of
//! 16). Slots belonging to absent modules read zero.

use serde::{Deserialize, Serialize};

/// Number of pulse counter channels.
pub const PULSE_CHANNELS: usize = 4;
/// Number of analog input slots.
pub const ANALOG_CHANNELS: usize = 2;
/// Width of one thermocouple group.
pub const THERMOCOUPLE_GROUP_WIDTH: usize = 16;
/// Maximum number of thermocouple modules mapped into the layout.
pub const THERMOCOUPLE_GROUPS: usize = 2;
/// Total thermocouple slots.
pub const THERMOCOUPLE_CHANNELS: usize = THERMOCOUPLE_GROUP_WIDTH * THERMOCOUPLE_GROUPS;

// =============================================================================
// Module Inventory
// =============================================================================

/// Chassis module types understood by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleKind {
    /// NI 9211, 4-channel thermocouple input.
    Ni9211,
    /// NI 9214, 16-channel thermocouple input.
    Ni9214,
    /// NI 9411, digital input used as pulse counters.
    Ni9411,
    /// NI 9203, 8-channel 0-20 mA current input.
    Ni9203,
    /// NI 9215, 4-channel 0-10 V differential voltage input.
    Ni9215,
    /// NI 9264, voltage output.
    Ni9264,
}

impl ModuleKind {
    /// Parse a product type string as reported by the chassis (e.g. `"NI 9214"`).
    pub fn from_product_type(product: &str) -> Option<Self> {
        match product.trim() {
            "NI 9211" => Some(ModuleKind::Ni9211),
            "NI 9214" => Some(ModuleKind::Ni9214),
            "NI 9411" => Some(ModuleKind::Ni9411),
            "NI 9203" => Some(ModuleKind::Ni9203),
            "NI 9215" => Some(ModuleKind::Ni9215),
            "NI 9264" => Some(ModuleKind::Ni9264),
            _ => None,
        }
    }

    /// Product type string for this module.
    pub fn product_type(self) -> &'static str {
        match self {
            ModuleKind::Ni9211 => "NI 9211",
            ModuleKind::Ni9214 => "NI 9214",
            ModuleKind::Ni9411 => "NI 9411",
            ModuleKind::Ni9203 => "NI 9203",
            ModuleKind::Ni9215 => "NI 9215",
            ModuleKind::Ni9264 => "NI 9264",
        }
    }

    /// Thermocouple channels provided, zero for other module types.
    pub fn thermocouple_channels(self) -> usize {
        match self {
            ModuleKind::Ni9211 => 4,
            ModuleKind::Ni9214 => 16,
            _ => 0,
        }
    }
}

/// A module found in a chassis slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledModule {
    /// Chassis slot, 1-based.
    pub slot: u8,
    /// Module type.
    pub kind: ModuleKind,
}

/// Which module feeds the analog slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalogSource {
    /// Voltage input module (preferred).
    Voltage,
    /// Current input module.
    Current,
}

/// Modules detected in the chassis, in slot order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChassisInventory {
    modules: Vec<InstalledModule>,
}

impl ChassisInventory {
    /// Build an inventory, sorting modules by slot.
    pub fn new(mut modules: Vec<InstalledModule>) -> Self {
        modules.sort_by_key(|m| m.slot);
        Self { modules }
    }

    /// Build an inventory from `(slot, product type)` pairs, skipping unknown products.
    pub fn from_product_types<'a>(entries: impl IntoIterator<Item = (u8, &'a str)>) -> Self {
        let modules = entries
            .into_iter()
            .filter_map(|(slot, product)| {
                let kind = ModuleKind::from_product_type(product);
                if kind.is_none() {
                    tracing::debug!(slot, product, "Ignoring unsupported chassis module");
                }
                kind.map(|kind| InstalledModule { slot, kind })
            })
            .collect();
        Self::new(modules)
    }

    /// All recognized modules.
    pub fn modules(&self) -> &[InstalledModule] {
        &self.modules
    }

    /// Number of recognized modules.
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// True when no recognized module is installed.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// True when a counter module is installed.
    pub fn has_counters(&self) -> bool {
        self.modules.iter().any(|m| m.kind == ModuleKind::Ni9411)
    }

    /// Thermocouple modules mapped into the layout, at most [`THERMOCOUPLE_GROUPS`].
    pub fn thermocouple_modules(&self) -> Vec<InstalledModule> {
        self.modules
            .iter()
            .filter(|m| m.kind.thermocouple_channels() > 0)
            .take(THERMOCOUPLE_GROUPS)
            .copied()
            .collect()
    }

    /// Analog source, voltage preferred over current.
    pub fn analog_source(&self) -> Option<AnalogSource> {
        if self.modules.iter().any(|m| m.kind == ModuleKind::Ni9215) {
            Some(AnalogSource::Voltage)
        } else if self.modules.iter().any(|m| m.kind == ModuleKind::Ni9203) {
            Some(AnalogSource::Current)
        } else {
            None
        }
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// One reading of every channel in the fixed layout.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HardwareSnapshot {
    /// Cumulative pulse counts.
    pub counters: [u64; PULSE_CHANNELS],
    /// Analog inputs (volts or amps).
    pub analog: [f64; ANALOG_CHANNELS],
    /// Thermocouple temperatures, °F.
    pub thermocouples: [f64; THERMOCOUPLE_CHANNELS],
}

impl HardwareSnapshot {
    /// Snapshot with every slot at zero.
    pub fn zeroed() -> Self {
        Self::default()
    }

    /// Place per-module thermocouple readings into their groups, zero-padding
    /// short modules.
    pub fn set_thermocouple_group(&mut self, group: usize, values: &[f64]) {
        if group >= THERMOCOUPLE_GROUPS {
            return;
        }
        let start = group * THERMOCOUPLE_GROUP_WIDTH;
        let slots = &mut self.thermocouples[start..start + THERMOCOUPLE_GROUP_WIDTH];
        for (i, slot) in slots.iter_mut().enumerate() {
            *slot = values.get(i).copied().unwrap_or(0.0);
        }
    }
}

/// A published hardware snapshot with its health markers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HardwareReading {
    /// Channel values.
    pub snapshot: HardwareSnapshot,
    /// Number of recognized modules.
    pub module_count: usize,
    /// False once the chassis disconnected.
    pub connected: bool,
}

impl HardwareReading {
    /// Reading for a chassis with nothing installed or not yet polled.
    pub fn absent() -> Self {
        Self {
            snapshot: HardwareSnapshot::zeroed(),
            module_count: 0,
            connected: false,
        }
    }

    /// True when the values come from live modules.
    pub fn is_live(&self) -> bool {
        self.connected && self.module_count > 0
    }
}

impl Default for HardwareReading {
    fn default() -> Self {
        Self::absent()
    }
}
