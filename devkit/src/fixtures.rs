/*!
Builders de payloads Redfish et châssis prêt à l'emploi

Les builders renvoient des `serde_json::Value` ayant la forme des réponses
d'un vrai BMC (membres de la collection Sensors, tableaux Thermal).
`MiramarChassis` installe un arbre de capteurs complet dans un `MockBmc`.
*/

use crate::redfish_stub::MockBmc;
use serde_json::{json, Value};

pub const DEFAULT_CHASSIS: &str = "Miramar_Sensor";

/// Builders statiques de documents capteurs
pub struct RedfishPayloadBuilder;

impl RedfishPayloadBuilder {
    fn status(state: &str) -> Value {
        let health = if state == "Enabled" { json!("OK") } else { Value::Null };
        json!({"State": state, "Health": health})
    }

    /// Collection `Members` pointant vers `{path}/{id}` pour chaque id
    pub fn collection(path: &str, member_ids: &[&str]) -> Value {
        let members: Vec<Value> = member_ids
            .iter()
            .map(|id| json!({"@odata.id": format!("{path}/{id}")}))
            .collect();
        json!({
            "@odata.id": path,
            "Name": "Sensors",
            "Members@odata.count": members.len(),
            "Members": members,
        })
    }

    /// A member of the Sensors collection reporting watts.
    pub fn power_sensor(path: &str, id: &str, watts: Option<f64>) -> Value {
        json!({
            "@odata.id": format!("{path}/{id}"),
            "Id": id,
            "Name": id,
            "Reading": watts,
            "ReadingUnits": "W",
            "ReadingType": "Power",
            "Status": Self::status("Enabled"),
        })
    }

    /// An entry of the Thermal `Fans` array.
    pub fn fan(thermal_path: &str, index: usize, member_id: &str, rpm: Option<f64>, state: &str) -> Value {
        json!({
            "@odata.id": format!("{thermal_path}#/Fans/{index}"),
            "MemberId": member_id,
            "Name": member_id,
            "Reading": rpm,
            "ReadingUnits": "RPM",
            "Status": Self::status(state),
        })
    }

    /// An entry of the Thermal `Temperatures` array.
    pub fn temperature(thermal_path: &str, index: usize, member_id: &str, celsius: Option<f64>, state: &str) -> Value {
        json!({
            "@odata.id": format!("{thermal_path}#/Temperatures/{index}"),
            "MemberId": member_id,
            "Name": member_id,
            "ReadingCelsius": celsius,
            "Status": Self::status(state),
        })
    }

    pub fn thermal(thermal_path: &str, fans: Vec<Value>, temperatures: Vec<Value>) -> Value {
        json!({
            "@odata.id": thermal_path,
            "Id": "Thermal",
            "Name": "Thermal",
            "Fans": fans,
            "Temperatures": temperatures,
        })
    }
}

#[derive(Debug, Clone)]
pub struct FanFixture {
    pub member_id: String,
    pub rpm: Option<f64>,
    pub state: String,
}

#[derive(Debug, Clone)]
pub struct TemperatureFixture {
    pub member_id: String,
    pub celsius: Option<f64>,
    pub state: String,
}

/// Sensor tree of one chassis. Mutate the vectors, then `install` again to
/// change what the BMC reports.
#[derive(Debug, Clone)]
pub struct MiramarChassis {
    pub chassis: String,
    /// `(sensor id, watts)`; ids follow the `power_PWR_*` convention.
    pub power: Vec<(String, Option<f64>)>,
    /// Non-PSU members of the Sensors collection (filtered out by the exporter).
    pub other_sensors: Vec<String>,
    pub fans: Vec<FanFixture>,
    pub temperatures: Vec<TemperatureFixture>,
}

impl Default for MiramarChassis {
    fn default() -> Self {
        let fan = |id: &str, rpm: Option<f64>, state: &str| FanFixture {
            member_id: id.into(),
            rpm,
            state: state.into(),
        };
        let temp = |id: &str, celsius: Option<f64>| TemperatureFixture {
            member_id: id.into(),
            celsius,
            state: "Enabled".into(),
        };

        Self {
            chassis: DEFAULT_CHASSIS.into(),
            power: vec![
                ("power_PWR_PDB_PSU1".into(), Some(1210.0)),
                ("power_PWR_PDB_PSU2".into(), Some(1190.5)),
                ("power_PWR_MB_PSU1".into(), Some(450.5)),
            ],
            other_sensors: vec!["voltage_VOLT_P12V".into(), "current_CURR_MB".into()],
            fans: vec![
                fan("SPD_FAN_1_F", Some(5200.0), "Enabled"),
                fan("SPD_FAN_1_R", Some(4980.0), "Enabled"),
                fan("SPD_FAN_2_F", None, "Absent"),
            ],
            temperatures: vec![
                temp("TEMP_CPU0", Some(48.0)),
                temp("TEMP_PDB_PSU1", Some(35.5)),
                temp("TEMP_MB_PSU1", Some(31.0)),
            ],
        }
    }
}

impl MiramarChassis {
    pub fn sensors_path(&self) -> String {
        format!("/redfish/v1/Chassis/{}/Sensors", self.chassis)
    }

    pub fn thermal_path(&self) -> String {
        format!("/redfish/v1/Chassis/{}/Thermal", self.chassis)
    }

    /// Enregistre la collection, chaque membre capteur et le document Thermal
    pub fn install(&self, bmc: &MockBmc) {
        let sensors = self.sensors_path();
        let thermal = self.thermal_path();

        let mut ids: Vec<&str> = self.power.iter().map(|(id, _)| id.as_str()).collect();
        ids.extend(self.other_sensors.iter().map(String::as_str));
        bmc.set_resource(sensors.clone(), RedfishPayloadBuilder::collection(&sensors, &ids));

        for (id, watts) in &self.power {
            bmc.set_resource(format!("{sensors}/{id}"), RedfishPayloadBuilder::power_sensor(&sensors, id, *watts));
        }
        for id in &self.other_sensors {
            bmc.set_resource(
                format!("{sensors}/{id}"),
                json!({"@odata.id": format!("{sensors}/{id}"), "Id": id, "Reading": 12.1, "ReadingUnits": "V"}),
            );
        }

        let fans = self
            .fans
            .iter()
            .enumerate()
            .map(|(i, f)| RedfishPayloadBuilder::fan(&thermal, i, &f.member_id, f.rpm, &f.state))
            .collect();
        let temperatures = self
            .temperatures
            .iter()
            .enumerate()
            .map(|(i, t)| RedfishPayloadBuilder::temperature(&thermal, i, &t.member_id, t.celsius, &t.state))
            .collect();
        bmc.set_resource(thermal.clone(), RedfishPayloadBuilder::thermal(&thermal, fans, temperatures));

        log::info!(
            "📦 Installed chassis {} ({} PSU, {} fans, {} temperatures)",
            self.chassis,
            self.power.len(),
            self.fans.len(),
            self.temperatures.len()
        );
    }
}
