//! OpenTherm data-id catalogue.
//!
//! One [`Descriptor`] per data-id 0..=133, plus two pseudo ids used for
//! telemetry produced by the gateway itself. Ids without an entry resolve
//! to an undefined descriptor.

use crate::frame::MessageType;
use crate::value::Encoding;

/// Which message kinds a data-id supports
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum CommandKind {
    Read,
    Write,
    ReadWrite,
    Undefined,
}

impl CommandKind {
    /// Whether a frame of `msg` type is consistent with this id.
    ///
    /// Only the read/write request and acknowledge types are checked, the
    /// error types (`DataInvalid`, `UnknownDataId` ..) are always accepted.
    pub fn permits(self, msg: MessageType) -> bool {
        match (self, msg) {
            (CommandKind::Undefined, _) => true,
            (_, MessageType::ReadData) | (_, MessageType::ReadAck) => {
                self == CommandKind::Read || self == CommandKind::ReadWrite
            }
            (_, MessageType::WriteData) | (_, MessageType::WriteAck) => {
                self == CommandKind::Write || self == CommandKind::ReadWrite
            }
            _ => true,
        }
    }
}

/// Static description of one data-id
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Descriptor {
    pub id: u8,
    pub kind: CommandKind,
    pub encoding: Encoding,
    /// Short label, used in publish topics
    pub label: &'static str,
    /// Human readable description
    pub name: &'static str,
    pub unit: &'static str,
}

impl Descriptor {
    pub fn is_defined(&self) -> bool {
        self.encoding != Encoding::Undefined
    }
}

/// Pseudo id for the S0 pulse counter
pub const ID_PULSE_COUNTER: u8 = 245;
/// Pseudo id for the external temperature probe
pub const ID_TEMPERATURE_PROBE: u8 = 246;

/// Highest OpenTherm data-id in the catalogue
pub const MSGID_MAX: u8 = 133;

const fn d(
    id: u8,
    kind: CommandKind,
    encoding: Encoding,
    label: &'static str,
    name: &'static str,
    unit: &'static str,
) -> Descriptor {
    Descriptor { id, kind, encoding, label, name, unit }
}

const fn undefined(id: u8) -> Descriptor {
    d(id, CommandKind::Undefined, Encoding::Undefined, "", "", "")
}

use self::CommandKind::{Read, ReadWrite, Write};
use crate::value::Encoding::{DayTime, Flag8, Flag8Flag8, Flag8U8, S16, S8S8, U16, U8, U8U8, F88};

const PULSE_COUNTER: Descriptor =
    d(ID_PULSE_COUNTER, Read, U16, "S0PulseCount", "S0 pulse counter", "");
const TEMPERATURE_PROBE: Descriptor =
    d(ID_TEMPERATURE_PROBE, Read, F88, "SensorTemperature", "Temperature probe", "°C");

/// Catalogue indexed by data-id
pub static DICTIONARY: [Descriptor; MSGID_MAX as usize + 1] = [
    d(0, Read, Flag8Flag8, "Status", "Master and Slave status", ""),
    d(1, Write, F88, "TSet", "Control setpoint", "°C"),
    d(2, Write, Flag8U8, "MasterConfigMemberIDcode", "Master Config / Member ID", ""),
    d(3, Read, Flag8U8, "SlaveConfigMemberIDcode", "Slave Config / Member ID", ""),
    d(4, ReadWrite, U8U8, "Command", "Command-Code", ""),
    d(5, Read, Flag8U8, "ASFflags", "Application-specific fault", ""),
    d(6, Read, Flag8U8, "RBPflags", "Remote-parameter flags", ""),
    d(7, Write, F88, "CoolingControl", "Cooling control signal", "%"),
    d(8, Write, F88, "TsetCH2", "Control setpoint for 2e CH circuit", "°C"),
    d(9, Read, F88, "TrOverride", "Remote override room setpoint", "°C"),
    d(10, Read, U8U8, "TSP", "Number of Transparent-Slave-Parameters supported by slave", ""),
    d(11, ReadWrite, U8U8, "TSPindexTSPvalue", "Index number / Value of referred-to transparent slave parameter", ""),
    d(12, Read, U8U8, "FHBsize", "Size of Fault-History-Buffer supported by slave", ""),
    d(13, Read, U8U8, "FHBindexFHBvalue", "Index number / Value of referred-to fault-history buffer entry", ""),
    d(14, Write, F88, "MaxRelModLevelSetting", "Maximum relative modulation level setting", "%"),
    d(15, Read, U8U8, "MaxCapacityMinModLevel", "Maximum boiler capacity (kW) / Minimum boiler modulation level(%)", "kW/%"),
    d(16, Write, F88, "TrSet", "Room Setpoint", "°C"),
    d(17, Read, F88, "RelModLevel", "Relative Modulation Level", "%"),
    d(18, Read, F88, "CHPressure", "Water pressure in CH circuit", "bar"),
    d(19, Read, F88, "DHWFlowRate", "Water flow rate in DHW circuit", "l/m"),
    d(20, ReadWrite, DayTime, "DayTime", "Day of Week and Time of Day", ""),
    d(21, ReadWrite, U8U8, "Date", "Calendar date", ""),
    d(22, ReadWrite, U16, "Year", "Calendar year", ""),
    d(23, Write, F88, "TrSetCH2", "Room Setpoint for 2nd CH circuit", "°C"),
    d(24, Write, F88, "Tr", "Room Temperature", "°C"),
    d(25, Read, F88, "Tboiler", "Boiler flow water temperature", "°C"),
    d(26, Read, F88, "Tdhw", "DHW temperature", "°C"),
    d(27, Read, F88, "Toutside", "Outside temperature", "°C"),
    d(28, Read, F88, "Tret", "Return water temperature", "°C"),
    d(29, Read, F88, "Tsolarstorage", "Solar storage temperature", "°C"),
    d(30, Read, S16, "Tsolarcollector", "Solar collector temperature", "°C"),
    d(31, Read, F88, "TflowCH2", "Flow water temperature CH2 circuit", "°C"),
    d(32, Read, F88, "Tdhw2", "Domestic hot water temperature 2", "°C"),
    d(33, Read, S16, "Texhaust", "Boiler exhaust temperature", "°C"),
    undefined(34),
    d(35, Read, U16, "FanSpeed", "fan speed", "rpm"),
    d(36, Read, F88, "ElectricalCurrentBurnerFlame", "Electrical current through burner flame", "µA"),
    d(37, Read, F88, "TRoomCH2", "Room temperature for 2nd CH circuit", "°C"),
    d(38, Read, U8U8, "RelativeHumidity", "Relative Humidity", "%"),
    undefined(39),
    undefined(40),
    undefined(41),
    undefined(42),
    undefined(43),
    undefined(44),
    undefined(45),
    undefined(46),
    undefined(47),
    d(48, Read, S8S8, "TdhwSetUBTdhwSetLB", "DHW setpoint upper & lower bounds for adjustment", "°C"),
    d(49, Read, S8S8, "MaxTSetUBMaxTSetLB", "Max CH water setpoint upper & lower bounds for adjustment", "°C"),
    d(50, Read, S8S8, "HcratioUBHcratioLB", "OTC heat curve ratio upper & lower bounds for adjustment", ""),
    undefined(51),
    undefined(52),
    undefined(53),
    undefined(54),
    undefined(55),
    d(56, ReadWrite, F88, "TdhwSet", "DHW setpoint", "°C"),
    d(57, ReadWrite, F88, "MaxTSet", "MaxCH water setpoint", "°C"),
    d(58, ReadWrite, F88, "Hcratio", "OTC heat curve ratio", "°C"),
    undefined(59),
    undefined(60),
    undefined(61),
    undefined(62),
    undefined(63),
    undefined(64),
    undefined(65),
    undefined(66),
    undefined(67),
    undefined(68),
    undefined(69),
    d(70, Read, Flag8Flag8, "StatusVH", "Status Ventilation/Heat recovery", ""),
    d(71, Write, U8, "ControlSetpointVH", "Control setpoint V/H", ""),
    d(72, Read, Flag8U8, "ASFFaultCodeVH", "Application-specific Fault Flags/Code V/H", ""),
    d(73, Read, U16, "DiagnosticCodeVH", "Diagnostic Code V/H", ""),
    d(74, Read, Flag8U8, "ConfigMemberIDVH", "Config/Member ID V/H", ""),
    d(75, Read, F88, "OpenthermVersionVH", "OpenTherm Version V/H", ""),
    d(76, Read, U8U8, "VersionTypeVH", "Version & Type V/H", ""),
    d(77, Read, U8, "RelativeVentilation", "Relative Ventilation", "%"),
    d(78, ReadWrite, U8U8, "RelativeHumidityExhaustAir", "Relative Humidity Exaust Air", "%"),
    d(79, ReadWrite, U16, "CO2LevelExhaustAir", "CO2 Level Exhaust Air", "ppm"),
    d(80, Read, F88, "SupplyInletTemperature", "Supply Inlet Temperature", "°C"),
    d(81, Read, F88, "SupplyOutletTemperature", "Supply Outlet Temperature", "°C"),
    d(82, Read, F88, "ExhaustInletTemperature", "Exhaust Inlet Temperature", "°C"),
    d(83, Read, F88, "ExhaustOutletTemperature", "Exhaust Outlet Temperature", "°C"),
    d(84, Read, U16, "ActualExhaustFanSpeed", "Actual Exhaust Fan Speed", "rpm"),
    d(85, Read, U16, "ActualSupplyFanSpeed", "Actual Supply Fan Speed", "rpm"),
    d(86, Read, Flag8Flag8, "RemoteParameterSettingVH", "Remote Parameter Setting V/H", ""),
    d(87, ReadWrite, U8, "NominalVentilationValue", "Nominal Ventilation Value", ""),
    d(88, Read, U8U8, "TSPNumberVH", "TSP Number V/H", ""),
    d(89, ReadWrite, U8U8, "TSPEntryVH", "TSP Entry V/H", ""),
    d(90, Read, U8U8, "FaultBufferSizeVH", "Fault Buffer Size V/H", ""),
    d(91, Read, U8U8, "FaultBufferEntryVH", "Fault Buffer Entry V/H", ""),
    undefined(92),
    undefined(93),
    undefined(94),
    undefined(95),
    undefined(96),
    undefined(97),
    d(98, Read, U8U8, "RFstrengthbatterylevel", "RF strength and battery level", ""),
    d(99, Read, U8U8, "OperatingMode_HC1_HC2_DHW", "Operating Mode HC1, HC2/ DHW", ""),
    d(100, Read, Flag8, "RoomRemoteOverrideFunction", "Function of manual and program changes in master and remote room setpoint.", ""),
    d(101, Read, Flag8Flag8, "SolarStorageMaster", "Solar Storage Master mode", ""),
    d(102, Read, Flag8U8, "SolarStorageASFflags", "Solar Storage Application-specific flags and OEM fault", ""),
    d(103, Read, Flag8U8, "SolarStorageSlaveConfigMemberIDcode", "Solar Storage Slave Config / Member ID", ""),
    d(104, Read, U8U8, "SolarStorageVersionType", "Solar Storage product version number and type", ""),
    d(105, Read, U8U8, "SolarStorageTSP", "Solar Storage Number of Transparent-Slave-Parameters supported", ""),
    d(106, ReadWrite, U8U8, "SolarStorageTSPindexTSPvalue", "Solar Storage Index number / Value of referred-to transparent slave parameter", ""),
    d(107, Read, U8U8, "SolarStorageFHBsize", "Solar Storage Size of Fault-History-Buffer supported by slave", ""),
    d(108, Read, U8U8, "SolarStorageFHBindexFHBvalue", "Solar Storage Index number / Value of referred-to fault-history buffer entry", ""),
    d(109, Read, U16, "ElectricityProducerStarts", "Electricity producer starts", ""),
    d(110, Read, U16, "ElectricityProducerHours", "Electricity producer hours", ""),
    d(111, Read, U16, "ElectricityProduction", "Electricity production", ""),
    d(112, Read, U16, "CumulativElectricityProduction", "Cumulativ Electricity production", ""),
    d(113, ReadWrite, U16, "BurnerUnsuccessfulStarts", "Nr of un-successful burner starts", ""),
    d(114, ReadWrite, U16, "FlameSignalTooLow", "Nr of times flame signal was too low", ""),
    d(115, Read, U16, "OEMDiagnosticCode", "OEM-specific diagnostic/service code", ""),
    d(116, ReadWrite, U16, "BurnerStarts", "Nr of starts burner", ""),
    d(117, ReadWrite, U16, "CHPumpStarts", "Nr of starts CH pump", ""),
    d(118, ReadWrite, U16, "DHWPumpValveStarts", "Nr of starts DHW pump/valve", ""),
    d(119, ReadWrite, U16, "DHWBurnerStarts", "Nr of starts burner during DHW mode", ""),
    d(120, ReadWrite, U16, "BurnerOperationHours", "Nr of hours that burner is in operation (i.e. flame on)", ""),
    d(121, ReadWrite, U16, "CHPumpOperationHours", "Nr of hours that CH pump has been running", ""),
    d(122, ReadWrite, U16, "DHWPumpValveOperationHours", "Nr of hours that DHW pump has been running or DHW valve has been opened", ""),
    d(123, ReadWrite, U16, "DHWBurnerOperationHours", "Nr of hours that burner is in operation during DHW mode", ""),
    d(124, Read, F88, "OpenThermVersionMaster", "Master Version OpenTherm Protocol Specification", ""),
    d(125, Read, F88, "OpenThermVersionSlave", "Slave Version OpenTherm Protocol Specification", ""),
    d(126, Read, U8U8, "MasterVersion", "Master product version number and type", ""),
    d(127, Read, U8U8, "SlaveVersion", "Slave product version number and type", ""),
    undefined(128),
    undefined(129),
    undefined(130),
    d(131, ReadWrite, U8U8, "RemehadFdUcodes", "Remeha dF-/dU-codes", ""),
    d(132, Read, U8U8, "RemehaServicemessage", "Remeha Servicemessage", ""),
    d(133, Read, U8U8, "RemehaDetectionConnectedSCU", "Remeha detection connected SCU's", ""),
];

/// Look up the descriptor for a data-id
pub fn lookup(id: u8) -> Descriptor {
    match id {
        ID_PULSE_COUNTER => PULSE_COUNTER,
        ID_TEMPERATURE_PROBE => TEMPERATURE_PROBE,
        id if id <= MSGID_MAX => DICTIONARY[id as usize],
        id => undefined(id),
    }
}
