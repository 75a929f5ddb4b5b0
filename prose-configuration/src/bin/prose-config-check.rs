// Copyright 2025 The kmesh Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
//

#![allow(clippy::print_stdout)]

//! Loads a scope configuration (and optionally a more specific one), merges them,
//! validates the result and prints the merged scope.

use clap::Parser;
use prose_configuration::{
    logging::{self, LogConfig},
    EffectiveConfig, FilterConfig,
};
use prose_error::{Context, Result};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Parser)]
#[command(version, about = "Validate privacy filter configuration")]
struct Args {
    /// Listener level configuration.
    parent: PathBuf,
    /// Optional route level configuration merged over the parent.
    child: Option<PathBuf>,
}

fn load(path: &PathBuf) -> Result<FilterConfig> {
    let yaml = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    FilterConfig::from_yaml(&yaml).with_context(|| format!("failed to parse {}", path.display()))
}

fn main() -> Result<()> {
    logging::init(&LogConfig::default())?;
    let args = Args::parse();

    let parent = load(&args.parent)?;
    let merged = match args.child {
        Some(ref child) => FilterConfig::merge(&parent, &load(child)?),
        None => parent,
    };

    let effective = EffectiveConfig::try_from(merged.clone()).with_context_msg("configuration is not valid")?;
    info!(
        direction = %effective.direction,
        enforce = effective.enforce,
        decision_url = %effective.policy_engine.decision_url()?,
        "configuration is valid"
    );

    let yaml = serde_yaml::to_string(&merged).with_context_msg("failed to serialize merged configuration")?;
    println!("{yaml}");
    Ok(())
}
