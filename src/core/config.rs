// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use crate::types::{
    service_types::{ApplicationDescription, ApplicationType},
    LocalizedText, UAString,
};

/// A trait that handles the loading / saving and validity of configuration information for a
/// client.
pub trait Config: serde::Serialize {
    fn save(&self, path: &Path) -> Result<(), String> {
        if let Err(errors) = self.validate() {
            let errors = errors.join(", ");
            error!("Config isn't valid and won't be saved, {}", errors);
            return Err(errors);
        }
        let s = serde_yaml::to_string(&self)
            .map_err(|err| format!("Cannot serialize configuration, {}", err))?;
        let mut f = File::create(path).map_err(|err| {
            error!("Cannot create the path to save the config");
            format!("Cannot create {}, {}", path.to_string_lossy(), err)
        })?;
        f.write_all(s.as_bytes()).map_err(|err| {
            error!("Could not save config - error = {:?}", err);
            format!("Cannot write {}, {}", path.to_string_lossy(), err)
        })
    }

    fn load<A>(path: &Path) -> Result<A, String>
    where
        for<'de> A: Config + serde::Deserialize<'de>,
    {
        let mut f = File::open(path).map_err(|err| {
            error!("Cannot open configuration file {}", path.to_string_lossy());
            format!("Cannot open {}, {}", path.to_string_lossy(), err)
        })?;
        let mut s = String::new();
        f.read_to_string(&mut s).map_err(|err| {
            error!(
                "Cannot read configuration file {} to string",
                path.to_string_lossy()
            );
            format!("Cannot read {}, {}", path.to_string_lossy(), err)
        })?;
        serde_yaml::from_str(&s).map_err(|err| {
            error!(
                "Cannot deserialize configuration from {}, error reason: {}",
                path.to_string_lossy(),
                err
            );
            format!("Cannot parse {}, {}", path.to_string_lossy(), err)
        })
    }

    /// Checks the configuration, returning every problem found
    fn validate(&self) -> Result<(), Vec<String>>;

    fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    fn application_name(&self) -> UAString;

    fn application_uri(&self) -> UAString;

    fn product_uri(&self) -> UAString;

    fn application_type(&self) -> ApplicationType;

    fn discovery_urls(&self) -> Option<Vec<UAString>> {
        None
    }

    fn application_description(&self) -> ApplicationDescription {
        ApplicationDescription {
            application_uri: self.application_uri(),
            application_name: LocalizedText::new("", self.application_name().as_ref()),
            application_type: self.application_type(),
            product_uri: self.product_uri(),
            gateway_server_uri: UAString::null(),
            discovery_profile_uri: UAString::null(),
            discovery_urls: self.discovery_urls(),
        }
    }
}
