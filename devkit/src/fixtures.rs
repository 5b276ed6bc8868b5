/*!
Builders de messages de télémétrie

Produit des messages au format du collecteur (nu ou enveloppé dans `data`).
*/

use serde_json::{json, Map, Value};

/// Message de télémétrie minimal, enrichi champ par champ.
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    ip: String,
    cloud_id: Value,
    biz_id: i64,
    cpu_cores: Vec<i64>,
    cpu_model: Option<String>,
    cpu_mhz: Option<f64>,
    disk_bytes: Option<i64>,
    mem_bytes: Option<i64>,
    interfaces: Vec<Value>,
    system: Map<String, Value>,
}

impl SnapshotBuilder {
    pub fn new(ip: &str, cloud_id: i64) -> Self {
        Self {
            ip: ip.to_string(),
            cloud_id: json!(cloud_id),
            biz_id: 0,
            cpu_cores: Vec::new(),
            cpu_model: None,
            cpu_mhz: None,
            disk_bytes: None,
            mem_bytes: None,
            interfaces: Vec::new(),
            system: Map::new(),
        }
    }

    /// Replaces `cloudid` with an arbitrary JSON value (or removes it with `Value::Null`).
    pub fn raw_cloud_id(mut self, value: Value) -> Self {
        self.cloud_id = value;
        self
    }

    /// `cores` processors of one core each.
    pub fn cpu(mut self, cores: i64) -> Self {
        self.cpu_cores = vec![1; cores.max(0) as usize];
        self
    }

    pub fn cpu_model(mut self, model: &str, mhz: f64) -> Self {
        self.cpu_model = Some(model.to_string());
        self.cpu_mhz = Some(mhz);
        self
    }

    pub fn disk_bytes(mut self, bytes: i64) -> Self {
        self.disk_bytes = Some(bytes);
        self
    }

    pub fn mem_bytes(mut self, bytes: i64) -> Self {
        self.mem_bytes = Some(bytes);
        self
    }

    pub fn interface(mut self, mac: &str, addrs: &[&str]) -> Self {
        let addrs: Vec<Value> = addrs.iter().map(|a| json!({ "addr": a })).collect();
        self.interfaces.push(json!({ "hardwareaddr": mac, "addrs": addrs }));
        self
    }

    pub fn hostname(mut self, name: &str) -> Self {
        self.system.insert("hostname".into(), json!(name));
        self
    }

    pub fn os(mut self, os: &str, platform: &str, version: &str) -> Self {
        self.system.insert("os".into(), json!(os));
        self.system.insert("platform".into(), json!(platform));
        self.system.insert("platformVersion".into(), json!(version));
        self
    }

    pub fn build(&self) -> Value {
        let cpuinfo: Vec<Value> = self
            .cpu_cores
            .iter()
            .map(|cores| {
                let mut cpu = json!({ "cores": cores });
                if let Some(model) = &self.cpu_model {
                    cpu["modelName"] = json!(model);
                }
                if let Some(mhz) = self.cpu_mhz {
                    cpu["mhz"] = json!(mhz);
                }
                cpu
            })
            .collect();

        let mut data = json!({
            "cpu": { "cpuinfo": cpuinfo },
            "net": { "interface": self.interfaces },
            "system": { "info": self.system },
        });
        if let Some(total) = self.disk_bytes {
            data["disk"] = json!({ "usage": [{ "path": "/", "total": total }] });
        }
        if let Some(total) = self.mem_bytes {
            data["mem"] = json!({ "meminfo": { "total": total } });
        }

        let mut msg = json!({ "ip": self.ip, "bizid": self.biz_id, "data": data });
        if !self.cloud_id.is_null() {
            msg["cloudid"] = self.cloud_id.clone();
        }
        msg
    }

    /// Bare message text.
    pub fn to_json(&self) -> String {
        self.build().to_string()
    }

    /// Message wrapped as `{"data": "<json>"}`, plus the inner text.
    pub fn wrapped(&self) -> (String, String) {
        let inner = self.to_json();
        (json!({ "data": inner }).to_string(), inner)
    }
}

/// Two one-core CPUs, 49 GiB disk, 996 MiB memory, CentOS 6.2 on eth0.
pub fn reference_message(ip: &str, cloud_id: i64) -> SnapshotBuilder {
    let addr = format!("{ip}/24");
    SnapshotBuilder::new(ip, cloud_id)
        .cpu(2)
        .cpu_model("Intel(R) Xeon(R) CPU E5-26xx v3", 2294.01)
        .disk_bytes(52_843_638_784)
        .mem_bytes(1_044_832_256)
        .interface("52:54:00:19:2e:e8", &[addr.as_str()])
        .hostname("VM_0_31_centos")
        .os("linux", "centos", "6.2")
}
