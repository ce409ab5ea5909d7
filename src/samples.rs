// Copyright (C) 2025 Michael Wilson <mike@mdwn.dev>
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

//! Sample decoding, preset banks and background loading.
//!
//! Samples are decoded entirely into memory when a preset loads, so playback never touches
//! the disk. Each preset becomes an immutable [`SampleBank`] that is published whole.

mod asset;
pub mod bank;
pub mod decoder;
pub mod definition;
mod loader;
pub mod preset;

pub use asset::SampleAsset;
pub use bank::{empty_handle, BankBuilder, BankHandle, SampleBank};
pub use decoder::DecodeError;
pub use definition::DefinitionError;
pub use loader::PresetLoader;
pub use preset::LoadError;
