//! Global switches kept in the FSA/FRA feature-flag bytes.

use std::fs;
use std::path::Path;

use afd_config::paths::WorkDir;
use afd_config::log_ctl_info;
use afd_log::{EventAction, EventClass, EventRecord, EventType, LogSinks};
use afd_state::fra::FRA_FILE;
use afd_state::fsa::FSA_FILE;
use afd_state::layout::{
    DISABLE_ARCHIVE, DISABLE_CREATE_SOURCE_DIR, DISABLE_DIR_WARN_TIME, DISABLE_HOST_WARN_TIME, DISABLE_RETRIEVE,
    ENABLE_CREATE_TARGET_DIR, ENABLE_SIMULATE_SEND_MODE,
};
use afd_state::{Fra, Fsa};
use serde::{Deserialize, Serialize};

use crate::{CtlError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    Archive,
    Retrieve,
    HostWarnTime,
    CreateSourceDir,
    CreateTargetDir,
    SimulateSendMode,
    DirWarnTime,
}

impl Feature {
    pub const ALL: [Feature; 7] = [
        Feature::Archive,
        Feature::Retrieve,
        Feature::HostWarnTime,
        Feature::CreateSourceDir,
        Feature::CreateTargetDir,
        Feature::SimulateSendMode,
        Feature::DirWarnTime,
    ];

    /// (flag bit, bit set means enabled, lives in the FRA)
    fn bit(self) -> (u8, bool, bool) {
        match self {
            Feature::Archive => (DISABLE_ARCHIVE, false, false),
            Feature::Retrieve => (DISABLE_RETRIEVE, false, false),
            Feature::HostWarnTime => (DISABLE_HOST_WARN_TIME, false, false),
            Feature::CreateSourceDir => (DISABLE_CREATE_SOURCE_DIR, false, false),
            Feature::CreateTargetDir => (ENABLE_CREATE_TARGET_DIR, true, false),
            Feature::SimulateSendMode => (ENABLE_SIMULATE_SEND_MODE, true, false),
            Feature::DirWarnTime => (DISABLE_DIR_WARN_TIME, false, true),
        }
    }

    fn label(self) -> &'static str {
        match self {
            Feature::Archive => "Archiving",
            Feature::Retrieve => "Retrieving",
            Feature::HostWarnTime => "Host warn time",
            Feature::CreateSourceDir => "Create source dir",
            Feature::CreateTargetDir => "Create target dir",
            Feature::SimulateSendMode => "Simulate send mode",
            Feature::DirWarnTime => "Dir warn time",
        }
    }

    fn action(self, enable: bool) -> EventAction {
        use EventAction::*;
        match (self, enable) {
            (Feature::Archive, true) => EnableArchive,
            (Feature::Archive, false) => DisableArchive,
            (Feature::Retrieve, true) => EnableRetrieve,
            (Feature::Retrieve, false) => DisableRetrieve,
            (Feature::HostWarnTime, true) => EnableHostWarnTime,
            (Feature::HostWarnTime, false) => DisableHostWarnTime,
            (Feature::CreateSourceDir, true) => EnableCreateSourceDir,
            (Feature::CreateSourceDir, false) => DisableCreateSourceDir,
            (Feature::CreateTargetDir, true) => EnableCreateTargetDir,
            (Feature::CreateTargetDir, false) => DisableCreateTargetDir,
            (Feature::SimulateSendMode, true) => EnableSimulateSendMode,
            (Feature::SimulateSendMode, false) => DisableSimulateSendMode,
            (Feature::DirWarnTime, true) => EnableDirWarnTime,
            (Feature::DirWarnTime, false) => DisableDirWarnTime,
        }
    }
}

/// Everything `afdctl cfg save` writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CfgSnapshot {
    pub fsa_feature_flags: u8,
    pub fra_feature_flags: u8,
    pub first_errors_offline: u8,
}

pub struct AfdCfg {
    fsa: Fsa,
    fra: Fra,
    user: String,
    logs: LogSinks,
}

impl AfdCfg {
    pub fn attach(work: &WorkDir, user: impl Into<String>, logs: LogSinks) -> Result<Self> {
        let fifo_dir = work.fifo_dir();
        Ok(Self {
            fra: Fra::attach(&fifo_dir.join(FRA_FILE))?,
            fsa: Fsa::attach(&fifo_dir.join(FSA_FILE))?,
            user: user.into(),
            logs,
        })
    }

    fn event(&self, action: EventAction, info: Option<String>) {
        let mut record = EventRecord::new(EventClass::Glob, EventType::Manual, action, "", &self.user);
        if let Some(info) = info {
            record = record.with_info(info);
        }
        self.logs.event(&record);
    }

    pub fn is_enabled(&self, feature: Feature) -> Result<bool> {
        let (bit, set_means_enabled, in_fra) = feature.bit();
        let flags = if in_fra {
            self.fra.feature_flags()?
        } else {
            self.fsa.feature_flags()?
        };
        Ok((flags & bit != 0) == set_means_enabled)
    }

    /// Turn a feature on or off; false when it already was
    pub fn set(&mut self, feature: Feature, enable: bool) -> Result<bool> {
        if self.is_enabled(feature)? == enable {
            return Ok(false);
        }
        let (bit, set_means_enabled, in_fra) = feature.bit();
        let on = enable == set_means_enabled;
        if in_fra {
            self.fra.set_feature_flags(bit, on)?;
        } else {
            self.fsa.set_feature_flags(bit, on)?;
        }
        self.event(feature.action(enable), None);
        log_ctl_info!("Feature switched", feature = feature.label(), enabled = enable);
        Ok(true)
    }

    pub fn set_errors_offline(&mut self, value: u8) -> Result<()> {
        let old = self.fsa.first_errors_offline();
        self.fsa.set_first_errors_offline(value)?;
        self.event(EventAction::ModifyErrorsOffline, Some(format!("{} -> {}", old, value)));
        Ok(())
    }

    /// One line per feature plus the errors-offline threshold
    pub fn status(&self) -> Result<Vec<String>> {
        let mut lines = Vec::with_capacity(Feature::ALL.len() + 1);
        for feature in Feature::ALL {
            let state = if self.is_enabled(feature)? {
                "Enabled"
            } else {
                "Disabled"
            };
            lines.push(format!("{:<20}: {}", feature.label(), state));
        }
        lines.push(format!("{:<20}: {}", "First errors offline", self.fsa.first_errors_offline()));
        Ok(lines)
    }

    pub fn snapshot(&self) -> Result<CfgSnapshot> {
        Ok(CfgSnapshot {
            fsa_feature_flags: self.fsa.feature_flags()?,
            fra_feature_flags: self.fra.feature_flags()?,
            first_errors_offline: self.fsa.first_errors_offline(),
        })
    }

    /// Write the snapshot as TOML
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(&self.snapshot()?).map_err(|e| CtlError::Usage(e.to_string()))?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Apply a saved snapshot, one event per changed feature
    pub fn recover(&mut self, path: &Path) -> Result<usize> {
        let text = fs::read_to_string(path)?;
        let saved: CfgSnapshot =
            toml::from_str(&text).map_err(|e| CtlError::Usage(format!("{}: {}", path.display(), e)))?;

        let mut changed = 0;
        for feature in Feature::ALL {
            let (bit, set_means_enabled, in_fra) = feature.bit();
            let flags = if in_fra {
                saved.fra_feature_flags
            } else {
                saved.fsa_feature_flags
            };
            if self.set(feature, (flags & bit != 0) == set_means_enabled)? {
                changed += 1;
            }
        }
        if self.fsa.first_errors_offline() != saved.first_errors_offline {
            self.set_errors_offline(saved.first_errors_offline)?;
            changed += 1;
        }
        Ok(changed)
    }
}
