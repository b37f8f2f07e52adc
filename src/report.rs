//! Per-state population counts and the CSV report built from them.

use std::fs::{create_dir_all, File};
use std::path::Path;

use csv::Writer;
use log::info;
use serde::Serialize;

use crate::cell::{Cell, CellState};
use crate::error::EpigridError;
use crate::observer::{GridSnapshot, Observer};

/// Number of cells in each visual state.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub default: u64,
    pub incubating: u64,
    pub contagious: u64,
    pub immune: u64,
    pub dead: u64,
    pub vaccinated: u64,
}

impl StateCounts {
    pub fn add(&mut self, state: CellState) {
        let slot = match state {
            CellState::Default => &mut self.default,
            CellState::Incubating => &mut self.incubating,
            CellState::Contagious => &mut self.contagious,
            CellState::Immune => &mut self.immune,
            CellState::Dead => &mut self.dead,
            CellState::Vaccinated => &mut self.vaccinated,
        };
        *slot += 1;
    }

    pub fn merge(&mut self, other: &StateCounts) {
        self.default += other.default;
        self.incubating += other.incubating;
        self.contagious += other.contagious;
        self.immune += other.immune;
        self.dead += other.dead;
        self.vaccinated += other.vaccinated;
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.default + self.incubating + self.contagious + self.immune + self.dead + self.vaccinated
    }

    /// Infected cells, contagious or not.
    #[must_use]
    pub fn infected(&self) -> u64 {
        self.incubating + self.contagious
    }

    /// Flat form used on the wire.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u64> {
        vec![
            self.default,
            self.incubating,
            self.contagious,
            self.immune,
            self.dead,
            self.vaccinated,
        ]
    }

    /// # Errors
    ///
    /// Returns `EpigridError::CommunicationError` if `values` does not have one entry per
    /// state.
    pub fn from_slice(values: &[u64]) -> Result<Self, EpigridError> {
        let [default, incubating, contagious, immune, dead, vaccinated] = values else {
            return Err(EpigridError::CommunicationError(format!(
                "expected 6 state counts, got {}",
                values.len()
            )));
        };
        Ok(StateCounts {
            default: *default,
            incubating: *incubating,
            contagious: *contagious,
            immune: *immune,
            dead: *dead,
            vaccinated: *vaccinated,
        })
    }
}

impl<'a> FromIterator<&'a Cell> for StateCounts {
    fn from_iter<I: IntoIterator<Item = &'a Cell>>(cells: I) -> Self {
        let mut counts = StateCounts::default();
        for cell in cells {
            counts.add(cell.state());
        }
        counts
    }
}

impl FromIterator<Cell> for StateCounts {
    fn from_iter<I: IntoIterator<Item = Cell>>(cells: I) -> Self {
        let mut counts = StateCounts::default();
        for cell in cells {
            counts.add(cell.state());
        }
        counts
    }
}

#[derive(Serialize)]
struct CountsRow {
    generation: u64,
    default: u64,
    incubating: u64,
    contagious: u64,
    immune: u64,
    dead: u64,
    vaccinated: u64,
}

impl CountsRow {
    fn new(generation: u64, counts: StateCounts) -> Self {
        CountsRow {
            generation,
            default: counts.default,
            incubating: counts.incubating,
            contagious: counts.contagious,
            immune: counts.immune,
            dead: counts.dead,
            vaccinated: counts.vaccinated,
        }
    }
}

/// Writes one CSV row of state counts per generation.
pub struct CountsReport {
    writer: Writer<File>,
}

impl CountsReport {
    /// Creates the report file and any missing parent directories.
    ///
    /// # Errors
    ///
    /// Returns `EpigridError::ConfigError` if the path is not a CSV file, or an I/O error if it
    /// cannot be created.
    pub fn create(path: &Path) -> Result<Self, EpigridError> {
        if path.extension().and_then(|ext| ext.to_str()) != Some("csv") {
            return Err(EpigridError::ConfigError(format!(
                "report files must be CSVs, got {}",
                path.display()
            )));
        }
        if let Some(parent) = path.parent() {
            create_dir_all(parent)?;
        }
        info!("writing state counts to {}", path.display());
        Ok(CountsReport {
            writer: Writer::from_writer(File::create(path)?),
        })
    }
}

impl Observer for CountsReport {
    fn on_generation(
        &mut self,
        generation: u64,
        snapshot: &GridSnapshot,
    ) -> Result<(), EpigridError> {
        self.writer
            .serialize(CountsRow::new(generation, snapshot.counts()))?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), EpigridError> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn counts_add_up() {
        let cells = [
            Cell::default(),
            Cell {
                is_infected: true,
                ..Cell::default()
            },
            Cell {
                is_infected: true,
                days_of_incubation: 3,
                ..Cell::default()
            },
            Cell {
                is_vaccinated: true,
                ..Cell::default()
            },
        ];
        let mut counts: StateCounts = cells.iter().collect();
        assert_eq!(counts.infected(), 2);
        assert_eq!(counts.total(), 4);
        counts.merge(&counts.clone());
        assert_eq!(counts.vaccinated, 2);
        assert_eq!(StateCounts::from_slice(&counts.to_vec()).unwrap(), counts);
        assert!(StateCounts::from_slice(&[1, 2]).is_err());
    }

    #[test]
    fn writes_one_row_per_generation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("counts.csv");
        let mut report = CountsReport::create(&path).unwrap();
        let snapshot = GridSnapshot::new(1, 2, vec![Cell::default(); 2]);
        report.on_generation(0, &snapshot).unwrap();
        report.on_generation(1, &snapshot).unwrap();
        report.finish().unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "generation,default,incubating,contagious,immune,dead,vaccinated",
                "0,2,0,0,0,0,0",
                "1,2,0,0,0,0,0",
            ]
        );
    }

    #[test]
    fn report_must_be_a_csv() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            CountsReport::create(&dir.path().join("counts.txt")),
            Err(EpigridError::ConfigError(_))
        ));
    }
}
