//! PulseAudio / PipeWire provisioning through `pactl`

use std::process::Command;

use crate::error::SinkError;
use crate::sink::{RoutingDefaults, SinkHandle, SinkProvisioner};

/// Runs `pactl` for each operation
#[derive(Debug, Clone)]
pub struct PactlProvisioner {
    program: String,
}

impl Default for PactlProvisioner {
    fn default() -> Self {
        Self {
            program: "pactl".to_string(),
        }
    }
}

impl PactlProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different `pactl` binary
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<String, String> {
        tracing::debug!("{} {}", self.program, args.join(" "));

        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|e| format!("{}: {}", self.program, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("{} ({})", stderr.trim(), output.status));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl SinkProvisioner for PactlProvisioner {
    fn probe(&self, name: &str) -> Result<bool, SinkError> {
        let listing = self.run(&["list", "short", "sinks"]).map_err(SinkError::ProbeFailed)?;
        let found = parse_sink_names(&listing).any(|sink| sink == name);
        Ok(found)
    }

    fn create(&self, name: &str) -> Result<SinkHandle, SinkError> {
        let sink_name = format!("sink_name={}", name);
        let properties = format!("sink_properties=device.description={}", name);
        let failed = |reason: String| SinkError::CreateFailed {
            name: name.to_string(),
            reason,
        };

        let stdout = self
            .run(&["load-module", "module-null-sink", &sink_name, &properties])
            .map_err(failed)?;
        let id = parse_module_index(&stdout).ok_or_else(|| failed(format!("unexpected output {:?}", stdout.trim())))?;

        Ok(SinkHandle {
            name: name.to_string(),
            id,
        })
    }

    fn read_defaults(&self) -> Result<RoutingDefaults, SinkError> {
        let info = self.run(&["info"]).map_err(SinkError::ReadDefaultsFailed)?;
        Ok(parse_defaults(&info))
    }

    fn set_default_sink(&self, name: &str) -> Result<(), SinkError> {
        self.run(&["set-default-sink", name])
            .map(|_| ())
            .map_err(|reason| SinkError::SetDefaultFailed {
                kind: "sink",
                target: name.to_string(),
                reason,
            })
    }

    fn set_default_source(&self, name: &str) -> Result<(), SinkError> {
        self.run(&["set-default-source", name])
            .map(|_| ())
            .map_err(|reason| SinkError::SetDefaultFailed {
                kind: "source",
                target: name.to_string(),
                reason,
            })
    }

    fn remove(&self, handle: &SinkHandle) -> Result<(), SinkError> {
        self.run(&["unload-module", &handle.id.to_string()])
            .map(|_| ())
            .map_err(|reason| SinkError::RemoveFailed(format!("{} (module {}): {}", handle.name, handle.id, reason)))
    }
}

/// Sink names from `pactl list short sinks` (second tab-separated column)
fn parse_sink_names(listing: &str) -> impl Iterator<Item = &str> {
    listing.lines().filter_map(|line| line.split('\t').nth(1)).map(str::trim)
}

fn parse_module_index(stdout: &str) -> Option<u32> {
    stdout.trim().parse().ok()
}

/// `Default Sink:` / `Default Source:` lines from `pactl info`
fn parse_defaults(info: &str) -> RoutingDefaults {
    let mut defaults = RoutingDefaults::default();
    for line in info.lines() {
        if let Some(value) = line.strip_prefix("Default Sink:") {
            defaults.sink = non_empty(value);
        } else if let Some(value) = line.strip_prefix("Default Source:") {
            defaults.source = non_empty(value);
        }
    }
    defaults
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sink_names() {
        let listing = "47\talsa_output.pci-0000_00_1f.3.analog-stereo\tPipeWire\ts32le 2ch 48000Hz\tSUSPENDED\n\
                       112\tvox_meter\tPipeWire\tfloat32le 2ch 48000Hz\tIDLE\n";
        let names: Vec<_> = parse_sink_names(listing).collect();
        assert_eq!(names, vec!["alsa_output.pci-0000_00_1f.3.analog-stereo", "vox_meter"]);
    }

    #[test]
    fn test_parse_sink_names_ignores_garbage() {
        assert_eq!(parse_sink_names("\nno tabs here\n").count(), 0);
    }

    #[test]
    fn test_parse_module_index() {
        assert_eq!(parse_module_index("536870913\n"), Some(536_870_913));
        assert_eq!(parse_module_index("Failure: Module initialization failed"), None);
    }

    #[test]
    fn test_parse_defaults() {
        let info = "Server String: /run/user/1000/pulse/native\n\
                    Server Name: PulseAudio (on PipeWire 1.0.5)\n\
                    Default Sink: alsa_output.usb-headset.analog-stereo\n\
                    Default Source: alsa_input.usb-headset.mono-fallback\n\
                    Cookie: 9c1a:5f2e\n";
        let defaults = parse_defaults(info);
        assert_eq!(defaults.sink.as_deref(), Some("alsa_output.usb-headset.analog-stereo"));
        assert_eq!(defaults.source.as_deref(), Some("alsa_input.usb-headset.mono-fallback"));
    }

    #[test]
    fn test_parse_defaults_missing_lines() {
        let defaults = parse_defaults("Default Sink: \nServer Name: pulse\n");
        assert_eq!(defaults, RoutingDefaults::default());
    }

    #[test]
    fn test_missing_program_is_probe_failure() {
        let provisioner = PactlProvisioner::with_program("/nonexistent/pactl");
        assert!(matches!(provisioner.probe("vox_meter"), Err(SinkError::ProbeFailed(_))));
    }
}
