// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// A looping voice: a file and how its bus starts out.
#[derive(Deserialize, Clone, Debug)]
pub struct Voice {
    /// The name of the voice.
    name: String,
    /// The loop file. Relative paths resolve against the config file's directory.
    file: String,
    /// Initial bus gain (default: 1.0)
    gain: Option<f32>,
    /// Whether the bus starts enabled (default: true)
    enabled: Option<bool>,
}

impl Voice {
    pub fn new(name: &str, file: &str) -> Voice {
        Voice {
            name: name.to_string(),
            file: file.to_string(),
            gain: None,
            enabled: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    /// The loop file resolved against the given directory.
    pub fn path(&self, base_dir: &Path) -> PathBuf {
        let file = Path::new(&self.file);
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            base_dir.join(file)
        }
    }

    pub fn gain(&self) -> f32 {
        self.gain.unwrap_or(1.0)
    }

    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}
