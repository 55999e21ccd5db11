//! Batch document loading.
//!
//! The document is a YAML mapping from machine name to its hardware
//! description. Entries come back in document order, fully validated, so
//! nothing malformed ever reaches the orchestrator.

use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

use super::vm::{ControllerKind, ControllerSpec, DiskSpec, MachineSpec, NicKind, KB_PER_GB};
use crate::errors::SpecError;

#[derive(Debug, Deserialize)]
struct RawMachine {
    cpu: Option<u32>,
    memory: Option<u64>,
    os: Option<String>,
    nictype: Option<String>,
    network: Option<String>,
    #[serde(default)]
    diskcontrollers: Vec<RawController>,
}

#[derive(Debug, Deserialize)]
struct RawController {
    #[serde(rename = "type", alias = "diskcontroller")]
    kind: Option<String>,
    #[serde(default)]
    disks: Vec<RawDisk>,
}

#[derive(Debug, Deserialize)]
struct RawDisk {
    size: Option<u64>,
}

pub fn load_batch(path: &Path) -> Result<Vec<MachineSpec>, SpecError> {
    info!("Loading batch document from {}", path.display());
    let text = std::fs::read_to_string(path).map_err(|e| SpecError::Unreadable {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    parse_batch(&text)
}

pub fn parse_batch(text: &str) -> Result<Vec<MachineSpec>, SpecError> {
    let document: serde_yaml::Value = serde_yaml::from_str(text)?;
    let mapping = match document {
        serde_yaml::Value::Mapping(mapping) => mapping,
        serde_yaml::Value::Null => return Err(SpecError::Empty),
        _ => {
            return Err(SpecError::Malformed(
                "top level must map machine names to their specs".to_string(),
            ))
        }
    };

    let mut machines = Vec::with_capacity(mapping.len());
    // serde_yaml keeps mapping entries in document order
    for (key, value) in mapping {
        let name = match key {
            serde_yaml::Value::String(name) if !name.trim().is_empty() => name,
            other => {
                return Err(SpecError::Malformed(format!(
                    "machine names must be non-empty strings, got {:?}",
                    other
                )))
            }
        };
        let raw: RawMachine =
            serde_yaml::from_value(value).map_err(|e| SpecError::InvalidValue {
                machine: name.clone(),
                field: "entry",
                reason: e.to_string(),
            })?;
        let spec = validate(name, raw)?;
        debug!(machine = %spec.name, controllers = spec.controllers.len(), "Validated machine entry");
        machines.push(spec);
    }

    if machines.is_empty() {
        return Err(SpecError::Empty);
    }
    Ok(machines)
}

fn validate(name: String, raw: RawMachine) -> Result<MachineSpec, SpecError> {
    let missing = |field| SpecError::MissingField { machine: name.clone(), field };
    let invalid = |field, reason: String| SpecError::InvalidValue {
        machine: name.clone(),
        field,
        reason,
    };

    let cpu_count = raw.cpu.ok_or_else(|| missing("cpu"))?;
    if cpu_count == 0 {
        return Err(invalid("cpu", "must be at least 1".to_string()));
    }

    let memory_mb = raw.memory.ok_or_else(|| missing("memory"))?;
    if memory_mb == 0 {
        return Err(invalid("memory", "must be at least 1 MB".to_string()));
    }

    let guest_os = raw.os.ok_or_else(|| missing("os"))?;
    if guest_os.trim().is_empty() {
        return Err(invalid("os", "must not be empty".to_string()));
    }

    let nic_raw = raw.nictype.ok_or_else(|| missing("nictype"))?;
    let nic_kind = NicKind::parse(&nic_raw)
        .ok_or_else(|| invalid("nictype", format!("unsupported adapter type '{}'", nic_raw)))?;

    let network = raw.network.ok_or_else(|| missing("network"))?;
    if network.trim().is_empty() {
        return Err(invalid("network", "must not be empty".to_string()));
    }

    let mut controllers = Vec::with_capacity(raw.diskcontrollers.len());
    for controller in raw.diskcontrollers {
        let kind_raw = controller.kind.ok_or_else(|| missing("diskcontrollers.type"))?;
        let kind = ControllerKind::parse(&kind_raw).ok_or_else(|| {
            invalid(
                "diskcontrollers.type",
                format!("unsupported controller type '{}'", kind_raw),
            )
        })?;

        let mut disks = Vec::with_capacity(controller.disks.len());
        for disk in controller.disks {
            let capacity_gb = disk.size.ok_or_else(|| missing("disks.size"))?;
            if capacity_gb == 0 {
                return Err(invalid("disks.size", "must be at least 1 GB".to_string()));
            }
            if capacity_gb.checked_mul(KB_PER_GB).is_none() {
                return Err(invalid("disks.size", format!("{} GB is too large", capacity_gb)));
            }
            disks.push(DiskSpec { capacity_gb });
        }
        controllers.push(ControllerSpec { kind, disks });
    }

    Ok(MachineSpec {
        name,
        cpu_count,
        memory_mb,
        guest_os,
        nic_kind,
        network,
        controllers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BATCH: &str = r#"
web1:
  cpu: 2
  memory: 4096
  os: otherGuest
  nictype: VMXNET3
  network: VM Network
  diskcontrollers:
    - type: lsi logic parallel
      disks:
        - size: 40
db1:
  cpu: 4
  memory: 8192
  os: ubuntu64Guest
  nictype: E1000
  network: Backend
  diskcontrollers:
    - diskcontroller: paravirtual
      disks:
        - size: 100
        - size: 200
    - type: lsi logic parallel
      disks: []
"#;

    #[test]
    fn keeps_document_order() {
        let machines = parse_batch(BATCH).unwrap();
        let names: Vec<_> = machines.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["web1", "db1"]);
    }

    #[test]
    fn builds_typed_entries() {
        let machines = parse_batch(BATCH).unwrap();
        let db = &machines[1];
        assert_eq!(db.cpu_count, 4);
        assert_eq!(db.memory_mb, 8192);
        assert_eq!(db.nic_kind, NicKind::E1000);
        assert_eq!(db.controllers.len(), 2);
        assert_eq!(db.controllers[0].kind, ControllerKind::Paravirtual);
        assert_eq!(
            db.controllers[0].disks,
            vec![DiskSpec { capacity_gb: 100 }, DiskSpec { capacity_gb: 200 }]
        );
        assert!(db.controllers[1].disks.is_empty());
    }

    #[test]
    fn diskcontrollers_are_optional() {
        let machines = parse_batch(
            "bare:\n  cpu: 1\n  memory: 512\n  os: otherGuest\n  nictype: E1000\n  network: VM Network\n",
        )
        .unwrap();
        assert!(machines[0].controllers.is_empty());
    }

    #[test]
    fn rejects_missing_fields() {
        let err = parse_batch("web1:\n  cpu: 2\n  os: otherGuest\n  nictype: E1000\n  network: n\n")
            .unwrap_err();
        assert!(matches!(
            err,
            SpecError::MissingField { ref machine, field: "memory" } if machine == "web1"
        ));
    }

    #[test]
    fn rejects_unknown_controller_kind() {
        let doc = "web1:\n  cpu: 2\n  memory: 1024\n  os: g\n  nictype: E1000\n  network: n\n  diskcontrollers:\n    - type: buslogic\n      disks: []\n";
        let err = parse_batch(doc).unwrap_err();
        assert!(matches!(err, SpecError::InvalidValue { field: "diskcontrollers.type", .. }));
    }

    #[test]
    fn rejects_unknown_nic_kind_and_zero_sizes() {
        let nic = "web1:\n  cpu: 2\n  memory: 1024\n  os: g\n  nictype: rtl8139\n  network: n\n";
        assert!(matches!(
            parse_batch(nic).unwrap_err(),
            SpecError::InvalidValue { field: "nictype", .. }
        ));

        let disk = "web1:\n  cpu: 2\n  memory: 1024\n  os: g\n  nictype: E1000\n  network: n\n  diskcontrollers:\n    - type: paravirtual\n      disks:\n        - size: 0\n";
        assert!(matches!(
            parse_batch(disk).unwrap_err(),
            SpecError::InvalidValue { field: "disks.size", .. }
        ));
    }

    #[test]
    fn rejects_disk_sizes_that_overflow_kilobytes() {
        let disk = |size: u64| {
            format!(
                "web1:\n  cpu: 2\n  memory: 1024\n  os: g\n  nictype: E1000\n  network: n\n  diskcontrollers:\n    - type: paravirtual\n      disks:\n        - size: {}\n",
                size
            )
        };

        assert!(matches!(
            parse_batch(&disk(u64::MAX)).unwrap_err(),
            SpecError::InvalidValue { field: "disks.size", .. }
        ));
        assert!(matches!(
            parse_batch(&disk(u64::MAX / KB_PER_GB + 1)).unwrap_err(),
            SpecError::InvalidValue { field: "disks.size", .. }
        ));

        // the largest size that still fits is accepted
        let largest = u64::MAX / KB_PER_GB;
        let specs = parse_batch(&disk(largest)).unwrap();
        assert_eq!(specs[0].controllers[0].disks[0].capacity_kb(), largest * KB_PER_GB);
    }

    #[test]
    fn rejects_empty_and_non_mapping_documents() {
        assert!(matches!(parse_batch("").unwrap_err(), SpecError::Empty));
        assert!(matches!(parse_batch("{}").unwrap_err(), SpecError::Empty));
        assert!(matches!(parse_batch("- web1\n- web2\n").unwrap_err(), SpecError::Malformed(_)));
    }

    #[test]
    fn wrong_value_types_name_the_machine() {
        let err = parse_batch("web1:\n  cpu: two\n").unwrap_err();
        assert!(matches!(err, SpecError::InvalidValue { ref machine, .. } if machine == "web1"));
    }

    #[test]
    fn loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vms.yaml");
        std::fs::write(&path, BATCH).unwrap();

        assert_eq!(load_batch(&path).unwrap().len(), 2);
        assert!(matches!(
            load_batch(&dir.path().join("missing.yaml")).unwrap_err(),
            SpecError::Unreadable { .. }
        ));
    }
}
