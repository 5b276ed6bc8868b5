/*!
Parsing des snapshots de télémétrie

Transforme un message brut du collecteur en:
- liste ordonnée des IP candidates annoncées par l'hôte
- map d'attributs à plat (cpu, mémoire, disque, os, runtime conteneur)
- table des interfaces, utilisée ensuite pour les MAC interne/externe

Un message incomplet n'est jamais une erreur: ce qui ne s'extrait pas est absent
de la map et signalé en debug.
*/

use crate::models::Attributes;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::net::IpAddr;
use tracing::debug;

const GIB: i64 = 1024 * 1024 * 1024;
const MIB: i64 = 1024 * 1024;

pub const OS_TYPE_LINUX: &str = "1";
pub const OS_TYPE_WINDOWS: &str = "2";
pub const OS_TYPE_AIX: &str = "3";

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("message is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("message payload is not a JSON object")]
    NotAnObject,
}

/// One network interface as reported by the collector.
#[derive(Debug, Clone, PartialEq)]
pub struct NetInterface {
    pub mac: String,
    pub ips: Vec<String>,
}

/// Everything extracted from one telemetry message.
#[derive(Debug, Clone)]
pub struct ParsedSnapshot {
    pub cloud_id: Option<i64>,
    pub biz_id: Option<i64>,
    pub candidate_ips: Vec<String>,
    pub attributes: Attributes,
    pub interfaces: Vec<NetInterface>,
    /// Unwrapped payload text, as published to the snapshot cache.
    pub payload: String,
}

impl ParsedSnapshot {
    /// Attributes for a resolved host: the host-independent set plus the MAC
    /// addresses of the interfaces carrying the host's inner and outer IPs.
    pub fn host_attributes(&self, inner_ip: &str, outer_ip: Option<&str>) -> Attributes {
        let mut attributes = self.attributes.clone();

        if let Some(mac) = self.mac_for(inner_ip) {
            attributes.insert("bk_mac".into(), Value::String(mac.to_string()));
        } else {
            debug!(ip = inner_ip, "bk_mac not found in message");
        }

        if let Some(outer_ip) = outer_ip {
            match self.mac_for(outer_ip) {
                Some(mac) => {
                    attributes.insert("bk_outer_mac".into(), Value::String(mac.to_string()));
                }
                None => debug!(ip = inner_ip, "bk_outer_mac not found in message"),
            }
        }

        attributes
    }

    fn mac_for(&self, ip: &str) -> Option<&str> {
        self.interfaces
            .iter()
            .find(|iface| iface.ips.iter().any(|candidate| candidate == ip))
            .map(|iface| iface.mac.as_str())
            .filter(|mac| !mac.is_empty())
    }
}

/// Parses a raw message, bare or wrapped as `{"data": "<json>"}`.
pub fn parse(raw: &str) -> Result<ParsedSnapshot, SnapshotError> {
    let outer: Value = serde_json::from_str(raw)?;
    let (root, payload) = unwrap_envelope(outer, raw)?;

    let interfaces = interfaces(&root);
    let candidate_ips = candidate_ips(&root, &interfaces);
    let attributes = extract_attributes(&root);

    Ok(ParsedSnapshot {
        cloud_id: root.get("cloudid").and_then(as_int),
        biz_id: root.get("bizid").and_then(as_int),
        candidate_ips,
        attributes,
        interfaces,
        payload,
    })
}

/// A message carrying `cloudid` at the top level is bare; otherwise the real
/// payload sits in `data`, either as JSON text or as an embedded object.
fn unwrap_envelope(outer: Value, raw: &str) -> Result<(Map<String, Value>, String), SnapshotError> {
    let Value::Object(mut outer) = outer else {
        return Err(SnapshotError::NotAnObject);
    };

    if outer.contains_key("cloudid") {
        return Ok((outer, raw.to_string()));
    }

    match outer.remove("data") {
        Some(Value::String(text)) => match serde_json::from_str(&text)? {
            Value::Object(inner) => Ok((inner, text)),
            _ => Err(SnapshotError::NotAnObject),
        },
        Some(Value::Object(inner)) => {
            let text = Value::Object(inner.clone()).to_string();
            Ok((inner, text))
        }
        _ => Err(SnapshotError::NotAnObject),
    }
}

fn interfaces(root: &Map<String, Value>) -> Vec<NetInterface> {
    let Some(list) = path(root, &["data", "net", "interface"]).and_then(Value::as_array) else {
        return Vec::new();
    };

    list.iter()
        .map(|iface| {
            let ips = iface
                .get("addrs")
                .and_then(Value::as_array)
                .map(|addrs| {
                    addrs
                        .iter()
                        .filter_map(|addr| match addr {
                            // old collectors: [{"addr": "10.0.0.5/24"}], newer ones: ["10.0.0.5/24"]
                            Value::Object(obj) => obj.get("addr").and_then(Value::as_str),
                            Value::String(s) => Some(s.as_str()),
                            _ => None,
                        })
                        .map(strip_prefix_len)
                        .collect()
                })
                .unwrap_or_default();
            NetInterface {
                mac: str_at(iface, &["hardwareaddr"]).unwrap_or_default(),
                ips,
            }
        })
        .collect()
}

/// Top-level `ip` first, then interface addresses, loopback/link-local and
/// duplicates removed.
fn candidate_ips(root: &Map<String, Value>, interfaces: &[NetInterface]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut ips = Vec::new();

    let top = root.get("ip").and_then(Value::as_str).map(str::trim);
    let all = top.into_iter().chain(interfaces.iter().flat_map(|i| i.ips.iter().map(String::as_str)));

    for ip in all {
        if !is_usable_ip(ip) {
            continue;
        }
        if seen.insert(ip.to_string()) {
            ips.push(ip.to_string());
        }
    }
    ips
}

fn strip_prefix_len(addr: &str) -> String {
    addr.split('/').next().unwrap_or_default().trim().to_string()
}

fn is_usable_ip(ip: &str) -> bool {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => !v4.is_loopback(),
        Ok(IpAddr::V6(v6)) => !v6.is_loopback() && (v6.segments()[0] & 0xffc0) != 0xfe80,
        Err(_) => false,
    }
}

fn extract_attributes(root: &Map<String, Value>) -> Attributes {
    let mut attrs = Attributes::new();
    let ip = root.get("ip").and_then(Value::as_str).unwrap_or_default();

    let cpuinfo = path(root, &["data", "cpu", "cpuinfo"]).and_then(Value::as_array);
    let first_cpu = cpuinfo.and_then(|list| list.first());

    let cpu_count = match cpuinfo {
        Some(list) if !list.is_empty() => checked_total(list.iter().filter_map(|c| c.get("cores").and_then(as_int)), "bk_cpu", ip),
        _ => path(root, &["data", "cpu", "total"]).and_then(as_int),
    };
    put_positive(&mut attrs, "bk_cpu", cpu_count, ip);

    let cpu_model = first_cpu
        .and_then(|c| str_at(c, &["modelName"]))
        .or_else(|| path(root, &["data", "cpu", "model"]).and_then(Value::as_str).map(|s| s.trim().to_string()));
    put_text(&mut attrs, "bk_cpu_module", cpu_model, ip);

    put_positive(&mut attrs, "bk_cpu_mhz", first_cpu.and_then(|c| c.get("mhz")).and_then(as_int), ip);

    let disk = match path(root, &["data", "disk", "usage"]).and_then(Value::as_array) {
        Some(usage) => checked_total(usage.iter().filter_map(|u| u.get("total").and_then(as_int)), "bk_disk", ip),
        None => path(root, &["data", "disk", "total"]).and_then(as_int),
    };
    put_positive(&mut attrs, "bk_disk", disk.map(|bytes| bytes / GIB), ip);

    let mem = path(root, &["data", "mem", "meminfo", "total"])
        .or_else(|| path(root, &["data", "mem", "total"]))
        .and_then(as_int);
    put_positive(&mut attrs, "bk_mem", mem.map(|bytes| bytes / MIB), ip);

    let info = path(root, &["data", "system", "info"]).or_else(|| path(root, &["data", "system"]));
    let field = |names: &[&str]| -> Option<String> {
        let info = info?;
        names.iter().find_map(|name| str_at(info, &[*name])).filter(|s| !s.is_empty())
    };

    put_text(&mut attrs, "bk_host_name", field(&["hostname"]), ip);

    let os = OsInfo::normalize(
        field(&["os"]).unwrap_or_default(),
        field(&["platform"]).unwrap_or_default(),
        field(&["platformVersion", "platVer"]).unwrap_or_default(),
    );
    put_text(&mut attrs, "bk_os_type", Some(os.os_type), ip);
    put_text(&mut attrs, "bk_os_name", Some(os.name), ip);
    put_text(&mut attrs, "bk_os_version", Some(os.version), ip);

    put_text(&mut attrs, "bk_os_bit", field(&["systemtype", "sysType"]), ip);

    let arch = path(root, &["data", "system", "arch"]).and_then(Value::as_str).map(|s| s.trim().to_string());
    if let Some(arch) = arch.filter(|a| !a.is_empty()) {
        attrs.insert("bk_cpu_architecture".into(), Value::String(arch));
    }

    // container runtime versions are optional, no diagnostic when missing
    for (key, side) in [("docker_client_version", "Client"), ("docker_server_version", "Server")] {
        if let Some(version) = path(root, &["data", "system", "docker", side, "Version"]).and_then(Value::as_str) {
            if !version.is_empty() {
                attrs.insert(key.into(), Value::String(version.to_string()));
            }
        }
    }

    attrs
}

struct OsInfo {
    os_type: String,
    name: String,
    version: String,
}

impl OsInfo {
    fn normalize(os: String, platform: String, version: String) -> Self {
        let (os_type, name, version) = match os.to_lowercase().as_str() {
            "linux" => {
                let version = version.replacen(".x86_64", "", 1).replacen(".i386", "", 1);
                (OS_TYPE_LINUX.to_string(), format!("{os} {platform}"), version)
            }
            "windows" => {
                let version = version.replacen("Microsoft ", "", 1);
                let platform = platform.replacen("Microsoft ", "", 1);
                (OS_TYPE_WINDOWS.to_string(), platform, version)
            }
            "aix" => (OS_TYPE_AIX.to_string(), platform, version),
            _ => (os, platform, version),
        };
        Self {
            os_type,
            name: name.trim().to_string(),
            version: version.trim().to_string(),
        }
    }
}

fn put_positive(attrs: &mut Attributes, key: &str, value: Option<i64>, ip: &str) {
    match value {
        Some(v) if v > 0 => {
            attrs.insert(key.to_string(), Value::from(v));
        }
        _ => debug!(ip, "{key} not found in message"),
    }
}

fn put_text(attrs: &mut Attributes, key: &str, value: Option<String>, ip: &str) {
    match value {
        Some(v) if !v.is_empty() => {
            attrs.insert(key.to_string(), Value::String(v));
        }
        _ => debug!(ip, "{key} not found in message"),
    }
}

/// Sum of reported values; `None` when it overflows.
fn checked_total(values: impl Iterator<Item = i64>, key: &str, ip: &str) -> Option<i64> {
    let mut total = 0i64;
    for v in values {
        let Some(next) = total.checked_add(v) else {
            debug!(ip, "{key} total overflows, ignored");
            return None;
        };
        total = next;
    }
    Some(total)
}

fn path<'a>(root: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    let (first, rest) = keys.split_first()?;
    rest.iter().try_fold(root.get(*first)?, |value, key| value.get(*key))
}

fn str_at(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .try_fold(value, |v, key| v.get(*key))
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
}

/// Integer view of a loosely typed field: integers, truncated floats and
/// numeric strings.
fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}
