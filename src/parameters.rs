//! Simulation parameters loaded once from a JSON file.
//!
//! The file uses camelCase keys:
//!
//! ```json
//! {
//!     "numberOfGenerations": 100,
//!     "matrixSize": 200,
//!     "squareSize": 4,
//!     "infectionPercentage": 15,
//!     "immunityPercentage": 40,
//!     "loseImmunityPercentage": 1,
//!     "vaccinationPercentage": 2,
//!     "deathPercentage": 4,
//!     "defaultPersonColor": [255, 255, 255],
//!     "incubationColor": [255, 200, 0],
//!     "infectedColor": [255, 0, 0],
//!     "immuneColor": [0, 200, 0],
//!     "deadColor": [60, 60, 60],
//!     "vaccinatedColor": [0, 100, 255],
//!     "millisecondsToWaitForEachGeneration": 0
//! }
//! ```
//!
//! Every field is required. Numbers must be non-negative and color channels must lie in
//! `0..=255`; anything else is rejected before a single generation runs.

use std::fs;
use std::path::Path;
use std::time::Duration;

use log::debug;
use serde::Deserialize;

use crate::error::EpigridError;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Rgb { r, g, b }
    }
}

/// Renderer colors, one per visual cell state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Colors {
    pub default_person: Rgb,
    pub incubation: Rgb,
    pub infected: Rgb,
    pub immune: Rgb,
    pub dead: Rgb,
    pub vaccinated: Rgb,
}

impl Default for Colors {
    fn default() -> Self {
        Colors {
            default_person: Rgb::new(255, 255, 255),
            incubation: Rgb::new(255, 200, 0),
            infected: Rgb::new(255, 0, 0),
            immune: Rgb::new(0, 200, 0),
            dead: Rgb::new(60, 60, 60),
            vaccinated: Rgb::new(0, 100, 255),
        }
    }
}

/// Validated, immutable simulation parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Parameters {
    pub number_of_generations: u64,
    /// The grid is `matrix_size x matrix_size`.
    pub matrix_size: usize,
    /// Side of one cell in rendered frames, in pixels.
    pub square_size: usize,
    pub infection_percentage: u32,
    pub immunity_percentage: u32,
    pub lose_immunity_percentage: u32,
    pub vaccination_percentage: u32,
    pub death_percentage: u32,
    pub colors: Colors,
    pub milliseconds_to_wait_for_each_generation: u64,
}

impl Default for Parameters {
    fn default() -> Self {
        Parameters {
            number_of_generations: 100,
            matrix_size: 64,
            square_size: 4,
            infection_percentage: 15,
            immunity_percentage: 40,
            lose_immunity_percentage: 1,
            vaccination_percentage: 2,
            death_percentage: 4,
            colors: Colors::default(),
            milliseconds_to_wait_for_each_generation: 0,
        }
    }
}

impl Parameters {
    #[must_use]
    pub fn pacing_delay(&self) -> Duration {
        Duration::from_millis(self.milliseconds_to_wait_for_each_generation)
    }

    /// Checks constraints that the field types alone cannot express.
    ///
    /// # Errors
    ///
    /// Returns `EpigridError::ConfigError` if the grid or the frame squares are empty.
    pub fn validate(&self) -> Result<(), EpigridError> {
        if self.matrix_size == 0 {
            return Err(EpigridError::ConfigError(
                "matrixSize must be positive".to_string(),
            ));
        }
        if self.square_size == 0 {
            return Err(EpigridError::ConfigError(
                "squareSize must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Parses and validates parameters from JSON text.
    ///
    /// # Errors
    ///
    /// Returns `EpigridError::JsonError` for malformed JSON or a missing field, and
    /// `EpigridError::ConfigError` for a value out of range.
    pub fn from_json(text: &str) -> Result<Parameters, EpigridError> {
        let raw: ParametersFile = serde_json::from_str(text)?;
        let parameters = Parameters::try_from(raw)?;
        parameters.validate()?;
        Ok(parameters)
    }
}

/// Loads parameters from a JSON file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or its contents are invalid.
pub fn load_parameters(path: &Path) -> Result<Parameters, EpigridError> {
    debug!("loading parameters from {}", path.display());
    let text = fs::read_to_string(path)?;
    Parameters::from_json(&text)
}

/// The file as written, before range checks. Keys it does not name are ignored.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ParametersFile {
    number_of_generations: i64,
    matrix_size: i64,
    square_size: i64,
    infection_percentage: i64,
    immunity_percentage: i64,
    lose_immunity_percentage: i64,
    vaccination_percentage: i64,
    death_percentage: i64,
    default_person_color: [i64; 3],
    incubation_color: [i64; 3],
    infected_color: [i64; 3],
    immune_color: [i64; 3],
    dead_color: [i64; 3],
    vaccinated_color: [i64; 3],
    milliseconds_to_wait_for_each_generation: i64,
}

fn non_negative<T: TryFrom<i64>>(name: &str, value: i64) -> Result<T, EpigridError> {
    if value < 0 {
        return Err(EpigridError::ConfigError(format!(
            "{name} is {value}, a non-negative value is expected"
        )));
    }
    T::try_from(value)
        .map_err(|_| EpigridError::ConfigError(format!("{name} is too large: {value}")))
}

fn color(name: &str, channels: [i64; 3]) -> Result<Rgb, EpigridError> {
    let channel = |value: i64| {
        u8::try_from(value).map_err(|_| {
            EpigridError::ConfigError(format!(
                "{name} has channel {value}, channels must be 0 <= value <= 255"
            ))
        })
    };
    Ok(Rgb::new(
        channel(channels[0])?,
        channel(channels[1])?,
        channel(channels[2])?,
    ))
}

impl TryFrom<ParametersFile> for Parameters {
    type Error = EpigridError;

    fn try_from(raw: ParametersFile) -> Result<Self, Self::Error> {
        Ok(Parameters {
            number_of_generations: non_negative("numberOfGenerations", raw.number_of_generations)?,
            matrix_size: non_negative("matrixSize", raw.matrix_size)?,
            square_size: non_negative("squareSize", raw.square_size)?,
            infection_percentage: non_negative("infectionPercentage", raw.infection_percentage)?,
            immunity_percentage: non_negative("immunityPercentage", raw.immunity_percentage)?,
            lose_immunity_percentage: non_negative(
                "loseImmunityPercentage",
                raw.lose_immunity_percentage,
            )?,
            vaccination_percentage: non_negative(
                "vaccinationPercentage",
                raw.vaccination_percentage,
            )?,
            death_percentage: non_negative("deathPercentage", raw.death_percentage)?,
            colors: Colors {
                default_person: color("defaultPersonColor", raw.default_person_color)?,
                incubation: color("incubationColor", raw.incubation_color)?,
                infected: color("infectedColor", raw.infected_color)?,
                immune: color("immuneColor", raw.immune_color)?,
                dead: color("deadColor", raw.dead_color)?,
                vaccinated: color("vaccinatedColor", raw.vaccinated_color)?,
            },
            milliseconds_to_wait_for_each_generation: non_negative(
                "millisecondsToWaitForEachGeneration",
                raw.milliseconds_to_wait_for_each_generation,
            )?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const VALID: &str = r#"{
        "numberOfGenerations": 10,
        "matrixSize": 16,
        "squareSize": 2,
        "infectionPercentage": 20,
        "immunityPercentage": 30,
        "loseImmunityPercentage": 1,
        "vaccinationPercentage": 3,
        "deathPercentage": 5,
        "defaultPersonColor": [255, 255, 255],
        "incubationColor": [255, 255, 0],
        "infectedColor": [255, 0, 0],
        "immuneColor": [0, 255, 0],
        "deadColor": [0, 0, 0],
        "vaccinatedColor": [0, 0, 255],
        "millisecondsToWaitForEachGeneration": 0
    }"#;

    fn with_field(key: &str, value: &str) -> String {
        let mut json: serde_json::Value = serde_json::from_str(VALID).unwrap();
        json[key] = serde_json::from_str(value).unwrap();
        json.to_string()
    }

    #[test]
    fn loads_a_valid_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(VALID.as_bytes()).unwrap();
        let parameters = load_parameters(file.path()).unwrap();
        assert_eq!(parameters.number_of_generations, 10);
        assert_eq!(parameters.matrix_size, 16);
        assert_eq!(parameters.infection_percentage, 20);
        assert_eq!(parameters.lose_immunity_percentage, 1);
        assert_eq!(parameters.colors.incubation, Rgb::new(255, 255, 0));
        assert_eq!(parameters.pacing_delay(), Duration::ZERO);
    }

    #[test]
    fn rejects_negative_percentages() {
        let err = Parameters::from_json(&with_field("deathPercentage", "-1")).unwrap_err();
        assert!(matches!(err, EpigridError::ConfigError(ref msg) if msg.contains("deathPercentage")));
    }

    #[test]
    fn rejects_negative_delays() {
        let json = with_field("millisecondsToWaitForEachGeneration", "-5");
        assert!(matches!(
            Parameters::from_json(&json),
            Err(EpigridError::ConfigError(_))
        ));
    }

    #[test]
    fn rejects_out_of_range_color_channels() {
        for bad in ["[256, 0, 0]", "[0, -1, 0]"] {
            let json = with_field("deadColor", bad);
            assert!(matches!(
                Parameters::from_json(&json),
                Err(EpigridError::ConfigError(_))
            ));
        }
    }

    #[test]
    fn rejects_missing_fields() {
        let mut json: serde_json::Value = serde_json::from_str(VALID).unwrap();
        json.as_object_mut().unwrap().remove("immunityPercentage");
        assert!(matches!(
            Parameters::from_json(&json.to_string()),
            Err(EpigridError::JsonError(_))
        ));
    }

    #[test]
    fn rejects_an_empty_grid() {
        assert!(matches!(
            Parameters::from_json(&with_field("matrixSize", "0")),
            Err(EpigridError::ConfigError(_))
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(
            load_parameters(Path::new("/nonexistent/epigrid.json")),
            Err(EpigridError::IoError(_))
        ));
    }

    #[test]
    fn ignores_keys_it_does_not_use() {
        let json = with_field("windowTitle", "\"Epidemic\"");
        let parameters = Parameters::from_json(&json).unwrap();
        assert_eq!(parameters.matrix_size, 16);
    }
}
