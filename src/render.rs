//! Frame rendering for snapshots.
//!
//! Each cell becomes a `square_size x square_size` block in the color of its [`CellState`],
//! darkened in proportion to the person's age. Frames are binary PPM (`P6`) images, one file
//! per generation, which any image viewer or `ffmpeg` can read.

use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::cell::{Cell, CellState};
use crate::error::EpigridError;
use crate::observer::{GridSnapshot, Observer};
use crate::parameters::{Colors, Rgb};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Palette {
    colors: Colors,
}

impl Palette {
    #[must_use]
    pub fn new(colors: Colors) -> Self {
        Palette { colors }
    }

    #[must_use]
    pub fn state_color(&self, state: CellState) -> Rgb {
        match state {
            CellState::Default => self.colors.default_person,
            CellState::Incubating => self.colors.incubation,
            CellState::Contagious => self.colors.infected,
            CellState::Immune => self.colors.immune,
            CellState::Dead => self.colors.dead,
            CellState::Vaccinated => self.colors.vaccinated,
        }
    }

    /// The state color shaded by age: older people are drawn darker.
    #[must_use]
    pub fn cell_color(&self, cell: &Cell) -> Rgb {
        let base = self.state_color(cell.state());
        let shade = |channel: u8| {
            let scaled = u32::from(channel) * (255 - u32::from(cell.age)) / 255;
            u8::try_from(scaled).unwrap_or(u8::MAX)
        };
        Rgb::new(shade(base.r), shade(base.g), shade(base.b))
    }
}

/// Writes one PPM frame per generation into a directory.
pub struct FrameWriter {
    directory: PathBuf,
    palette: Palette,
    square_size: usize,
}

impl FrameWriter {
    /// # Errors
    ///
    /// Returns `EpigridError::ConfigError` if `square_size` is zero, or an I/O error if the
    /// directory cannot be created.
    pub fn new(directory: &Path, palette: Palette, square_size: usize) -> Result<Self, EpigridError> {
        if square_size == 0 {
            return Err(EpigridError::ConfigError(
                "frames need a positive square size".to_string(),
            ));
        }
        create_dir_all(directory)?;
        info!("writing frames to {}", directory.display());
        Ok(FrameWriter {
            directory: directory.to_path_buf(),
            palette,
            square_size,
        })
    }

    #[must_use]
    pub fn frame_path(&self, generation: u64) -> PathBuf {
        self.directory.join(format!("frame-{generation:05}.ppm"))
    }

    /// Encodes a snapshot as a binary PPM image.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if `out` cannot be written.
    pub fn encode<W: Write>(&self, snapshot: &GridSnapshot, out: &mut W) -> Result<(), EpigridError> {
        let width = snapshot.cols * self.square_size;
        let height = snapshot.rows * self.square_size;
        write!(out, "P6\n{width} {height}\n255\n")?;
        let mut line = Vec::with_capacity(width * 3);
        for row in 0..snapshot.rows {
            line.clear();
            for col in 0..snapshot.cols {
                let color = self.palette.cell_color(&snapshot.get(row, col));
                for _ in 0..self.square_size {
                    line.extend_from_slice(&[color.r, color.g, color.b]);
                }
            }
            for _ in 0..self.square_size {
                out.write_all(&line)?;
            }
        }
        Ok(())
    }
}

impl Observer for FrameWriter {
    fn on_generation(
        &mut self,
        generation: u64,
        snapshot: &GridSnapshot,
    ) -> Result<(), EpigridError> {
        let path = self.frame_path(generation);
        debug!("rendering generation {generation} to {}", path.display());
        let mut out = BufWriter::new(File::create(&path)?);
        self.encode(snapshot, &mut out)?;
        out.flush()?;
        Ok(())
    }
}
