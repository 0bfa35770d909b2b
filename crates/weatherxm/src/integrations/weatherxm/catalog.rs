use serde::Deserialize;
use strum::Display;
use strum::EnumIter;
use strum::EnumString;
use strum::IntoStaticStr;

/// Language used for entity friendly names.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    De,
}

/// Every metric a station can report that gets its own sensor entity.
///
/// The string form is the key used in the provider's `current_weather` object.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum Metric {
    Temperature,
    Humidity,
    WindSpeed,
    WindGust,
    WindDirection,
    SolarIrradiance,
    UvIndex,
    Precipitation,
    PrecipitationAccumulated,
    Pressure,
    DewPoint,
    FeelsLike,
}

impl Metric {
    pub fn key(self) -> &'static str {
        self.into()
    }

    pub fn unit(self) -> Option<&'static str> {
        match self {
            Self::Temperature | Self::DewPoint | Self::FeelsLike => Some("°C"),
            Self::Humidity => Some("%"),
            Self::WindSpeed | Self::WindGust => Some("m/s"),
            Self::WindDirection => Some("°"),
            Self::SolarIrradiance => Some("W/m²"),
            Self::UvIndex => None,
            Self::Precipitation => Some("mm/h"),
            Self::PrecipitationAccumulated => Some("mm"),
            Self::Pressure => Some("hPa"),
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            Self::Temperature | Self::DewPoint | Self::FeelsLike => "mdi:thermometer",
            Self::Humidity => "mdi:water-percent",
            Self::WindSpeed | Self::WindGust => "mdi:weather-windy",
            Self::WindDirection => "mdi:compass",
            Self::SolarIrradiance => "mdi:weather-sunny",
            Self::UvIndex => "mdi:weather-sunny-alert",
            Self::Precipitation | Self::PrecipitationAccumulated => "mdi:weather-rainy",
            Self::Pressure => "mdi:gauge",
        }
    }

    /// Human-readable description, used as the entity's friendly name.
    pub fn description(self, language: Language) -> &'static str {
        match language {
            Language::En => match self {
                Self::Temperature => "Temperature",
                Self::Humidity => "Humidity",
                Self::WindSpeed => "Wind Speed",
                Self::WindGust => "Wind Gust",
                Self::WindDirection => "Wind Direction",
                Self::SolarIrradiance => "Solar Irradiance",
                Self::UvIndex => "UV Index",
                Self::Precipitation => "Precipitation",
                Self::PrecipitationAccumulated => "Accumulated Precipitation",
                Self::Pressure => "Pressure",
                Self::DewPoint => "Dew Point",
                Self::FeelsLike => "Feels Like",
            },
            Language::De => match self {
                Self::Temperature => "Temperatur",
                Self::Humidity => "Luftfeuchtigkeit",
                Self::WindSpeed => "Windgeschwindigkeit",
                Self::WindGust => "Windböen",
                Self::WindDirection => "Windrichtung",
                Self::SolarIrradiance => "Sonnenstrahlung",
                Self::UvIndex => "UV-Index",
                Self::Precipitation => "Niederschlag",
                Self::PrecipitationAccumulated => "Niederschlagsmenge",
                Self::Pressure => "Luftdruck",
                Self::DewPoint => "Taupunkt",
                Self::FeelsLike => "Gefühlte Temperatur",
            },
        }
    }
}
