use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

const TRAIT_PREFIX: &str = "action.devices.traits.";

macro_rules! trait_types {
    ($($variant:ident),* $(,)?) => {
        /// Capability bundles of the assistant smart-home protocol.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum TraitType {
            $($variant),*
        }

        impl TraitType {
            pub const ALL: &'static [TraitType] = &[$(TraitType::$variant),*];

            /// Name without the `action.devices.traits.` prefix
            pub fn short_name(&self) -> &'static str {
                match self {
                    $(TraitType::$variant => stringify!($variant)),*
                }
            }
        }
    };
}

trait_types!(
    AppSelector,
    ArmDisarm,
    Brightness,
    CameraStream,
    Channel,
    ColorSetting,
    Cook,
    Dispense,
    Dock,
    EnergyStorage,
    FanSpeed,
    Fill,
    HumiditySetting,
    InputSelector,
    LightEffects,
    Locator,
    LockUnlock,
    MediaState,
    Modes,
    NetworkControl,
    ObjectDetection,
    OnOff,
    OpenClose,
    Reboot,
    Rotation,
    RunCycle,
    Scene,
    SensorState,
    SoftwareUpdate,
    StartStop,
    StatusReport,
    TemperatureControl,
    TemperatureSetting,
    Timer,
    Toggles,
    TransportControl,
    Volume,
);

#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
#[display("Unknown trait {name}")]
pub struct UnknownTraitType {
    pub name: String,
}

impl FromStr for TraitType {
    type Err = UnknownTraitType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix(TRAIT_PREFIX)
            .and_then(|short| TraitType::ALL.iter().find(|t| t.short_name() == short))
            .copied()
            .ok_or_else(|| UnknownTraitType { name: s.to_string() })
    }
}

impl fmt::Display for TraitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", TRAIT_PREFIX, self.short_name())
    }
}

impl Serialize for TraitType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TraitType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}
