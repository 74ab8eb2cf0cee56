//! System sampling and `KEY="value"` formatting.

use std::fmt::Write;

use starship_battery as battery;
use sysinfo::{Components, CpuRefreshKind, Disks, MemoryRefreshKind, Networks, RefreshKind, System};
use tracing::warn;

use crate::cli::{Args, BatteryStat, CpuStat, DiskStat, MemoryStat, SystemStat, UptimeUnit};

const BYTES_PER_GB: f32 = 1_073_741_824.0;

/// Component labels that identify CPU-adjacent temperature sensors.
const CPU_SENSOR_LABELS: [&str; 3] = ["CPU", "PMU", "SOC"];

const ALL_BATTERY: [BatteryStat; 5] = [
    BatteryStat::Count,
    BatteryStat::Percentage,
    BatteryStat::State,
    BatteryStat::TimeToEmpty,
    BatteryStat::TimeToFull,
];
const ALL_CPU: [CpuStat; 4] = [
    CpuStat::Count,
    CpuStat::Frequency,
    CpuStat::Temperature,
    CpuStat::Usage,
];
const ALL_DISK: [DiskStat; 5] = [
    DiskStat::Count,
    DiskStat::Free,
    DiskStat::Total,
    DiskStat::Usage,
    DiskStat::Used,
];
const ALL_MEMORY: [MemoryStat; 8] = [
    MemoryStat::RamAvailable,
    MemoryStat::RamTotal,
    MemoryStat::RamUsage,
    MemoryStat::RamUsed,
    MemoryStat::SwapFree,
    MemoryStat::SwapTotal,
    MemoryStat::SwapUsage,
    MemoryStat::SwapUsed,
];
const ALL_SYSTEM: [SystemStat; 7] = [
    SystemStat::Arch,
    SystemStat::Distro,
    SystemStat::HostName,
    SystemStat::KernelVersion,
    SystemStat::Name,
    SystemStat::OsVersion,
    SystemStat::LongOsVersion,
];
const ALL_UPTIME: [UptimeUnit; 5] = [
    UptimeUnit::Week,
    UptimeUnit::Day,
    UptimeUnit::Hour,
    UptimeUnit::Min,
    UptimeUnit::Sec,
];

/// One sampling session. Holds the sysinfo state between samples so CPU
/// usage and network throughput are measured as deltas over the interval.
pub struct Sampler {
    refresh_kind: RefreshKind,
    system: System,
    disks: Disks,
    networks: Networks,
    ticks: u32,
    no_units: bool,
}

impl Sampler {
    pub fn new(no_units: bool) -> Self {
        let refresh_kind = RefreshKind::nothing()
            .with_cpu(CpuRefreshKind::nothing().with_cpu_usage().with_frequency())
            .with_memory(MemoryRefreshKind::nothing().with_ram().with_swap());
        Self {
            system: System::new_with_specifics(refresh_kind.clone()),
            refresh_kind,
            disks: Disks::new_with_refreshed_list(),
            networks: Networks::new_with_refreshed_list(),
            ticks: 0,
            no_units,
        }
    }

    /// Refreshes and formats the requested stat groups as a space-joined
    /// `KEY="value"` list, ready to append to a bar trigger command.
    pub fn collect(&mut self, args: &Args) -> String {
        self.system.refresh_specifics(self.refresh_kind.clone());
        self.disks.refresh(true);
        // Interface churn is rare; re-list every Nth tick, otherwise just
        // update the counters of the interfaces already known.
        self.networks
            .refresh(self.ticks % args.network_refresh_rate.max(1) == 0);
        self.ticks = self.ticks.wrapping_add(1);

        let mut out = String::new();
        if args.all {
            battery_stats(&ALL_BATTERY, self.no_units, &mut out);
            self.cpu_stats(&ALL_CPU, &mut out);
            self.disk_stats(&ALL_DISK, &mut out);
            self.memory_stats(&ALL_MEMORY, &mut out);
            self.network_stats(None, args.interval, &mut out);
            system_stats(&ALL_SYSTEM, &mut out);
            uptime_stats(System::uptime(), &ALL_UPTIME, &mut out);
        } else {
            if let Some(flags) = &args.battery {
                battery_stats(flags, self.no_units, &mut out);
            }
            if let Some(flags) = &args.cpu {
                self.cpu_stats(flags, &mut out);
            }
            if let Some(flags) = &args.disk {
                self.disk_stats(flags, &mut out);
            }
            if let Some(flags) = &args.memory {
                self.memory_stats(flags, &mut out);
            }
            if let Some(interfaces) = &args.network {
                self.network_stats(Some(interfaces), args.interval, &mut out);
            }
            if let Some(flags) = &args.system {
                system_stats(flags, &mut out);
            }
            if let Some(units) = &args.uptime {
                let units = if units.is_empty() { &ALL_UPTIME[..] } else { units };
                uptime_stats(System::uptime(), units, &mut out);
            }
        }
        out.trim_end().to_owned()
    }

    fn unit(&self, unit: &'static str) -> &'static str {
        if self.no_units { "" } else { unit }
    }

    fn cpu_stats(&self, flags: &[CpuStat], out: &mut String) {
        for &flag in flags {
            match flag {
                CpuStat::Count => {
                    let _ = write!(out, "CPU_COUNT=\"{}\" ", self.system.cpus().len());
                }
                CpuStat::Frequency => {
                    let cpus = self.system.cpus();
                    let avg = if cpus.is_empty() {
                        0
                    } else {
                        cpus.iter().map(|cpu| cpu.frequency()).sum::<u64>() / cpus.len() as u64
                    };
                    let unit = self.unit("MHz");
                    let _ = write!(out, "CPU_FREQUENCY=\"{avg}{unit}\" ");
                }
                CpuStat::Temperature => {
                    let unit = self.unit("°C");
                    match cpu_temperature() {
                        Some(temp) => {
                            let _ = write!(out, "CPU_TEMP=\"{temp:.1}{unit}\" ");
                        }
                        None => {
                            let _ = write!(out, "CPU_TEMP=\"N/A{unit}\" ");
                        }
                    }
                }
                CpuStat::Usage => {
                    let unit = self.unit("%");
                    let _ = write!(
                        out,
                        "CPU_USAGE=\"{:.0}{unit}\" ",
                        self.system.global_cpu_usage().round()
                    );
                }
            }
        }
    }

    fn disk_stats(&self, flags: &[DiskStat], out: &mut String) {
        let (total, used) = self.disks.list().iter().fold((0, 0), |(total, used), disk| {
            (
                total + disk.total_space(),
                used + disk.total_space() - disk.available_space(),
            )
        });
        for &flag in flags {
            match flag {
                DiskStat::Count => {
                    let _ = write!(out, "DISK_COUNT=\"{}\" ", self.disks.list().len());
                }
                DiskStat::Free => {
                    let unit = self.unit("GB");
                    let _ = write!(out, "DISK_FREE=\"{:.1}{unit}\" ", gigabytes(total - used));
                }
                DiskStat::Total => {
                    let unit = self.unit("GB");
                    let _ = write!(out, "DISK_TOTAL=\"{:.1}{unit}\" ", gigabytes(total));
                }
                DiskStat::Usage => {
                    let unit = self.unit("%");
                    let _ = write!(out, "DISK_USAGE=\"{}{unit}\" ", percentage(used, total));
                }
                DiskStat::Used => {
                    let unit = self.unit("GB");
                    let _ = write!(out, "DISK_USED=\"{:.1}{unit}\" ", gigabytes(used));
                }
            }
        }
    }

    fn memory_stats(&self, flags: &[MemoryStat], out: &mut String) {
        let s = &self.system;
        for &flag in flags {
            let gb = self.unit("GB");
            let pct = self.unit("%");
            match flag {
                MemoryStat::RamAvailable => {
                    let _ = write!(
                        out,
                        "RAM_AVAILABLE=\"{:.1}{gb}\" ",
                        gigabytes(s.available_memory())
                    );
                }
                MemoryStat::RamTotal => {
                    let _ = write!(out, "RAM_TOTAL=\"{:.1}{gb}\" ", gigabytes(s.total_memory()));
                }
                MemoryStat::RamUsage => {
                    let _ = write!(
                        out,
                        "RAM_USAGE=\"{}{pct}\" ",
                        percentage(s.used_memory(), s.total_memory())
                    );
                }
                MemoryStat::RamUsed => {
                    let _ = write!(out, "RAM_USED=\"{:.1}{gb}\" ", gigabytes(s.used_memory()));
                }
                MemoryStat::SwapFree => {
                    let _ = write!(out, "SWP_FREE=\"{:.1}{gb}\" ", gigabytes(s.free_swap()));
                }
                MemoryStat::SwapTotal => {
                    let _ = write!(out, "SWP_TOTAL=\"{:.1}{gb}\" ", gigabytes(s.total_swap()));
                }
                MemoryStat::SwapUsage => {
                    let _ = write!(
                        out,
                        "SWP_USAGE=\"{}{pct}\" ",
                        percentage(s.used_swap(), s.total_swap())
                    );
                }
                MemoryStat::SwapUsed => {
                    let _ = write!(out, "SWP_USED=\"{:.1}{gb}\" ", gigabytes(s.used_swap()));
                }
            }
        }
    }

    /// Per-interface throughput since the last sample, in KB/s. `None`
    /// reports every known interface; unknown names are skipped.
    fn network_stats(&self, interfaces: Option<&[String]>, interval: u32, out: &mut String) {
        if interval == 0 {
            return;
        }
        let unit = self.unit("KB/s");
        let names: Vec<&str> = match interfaces {
            Some(names) => names.iter().map(String::as_str).collect(),
            None => self.networks.keys().map(String::as_str).collect(),
        };
        for name in names {
            if let Some(data) = self.networks.get(name) {
                let _ = write!(
                    out,
                    "NETWORK_RX_{name}=\"{}{unit}\" NETWORK_TX_{name}=\"{}{unit}\" ",
                    (data.received() / 1024) / u64::from(interval),
                    (data.transmitted() / 1024) / u64::from(interval),
                );
            }
        }
    }
}

/// Figures from the first battery the OS reports. Hosts without one get
/// no BATTERY_ variables at all.
fn battery_stats(flags: &[BatteryStat], no_units: bool, out: &mut String) {
    let (manager, bat) = match first_battery() {
        Ok(found) => found,
        Err(error) => {
            warn!(%error, "battery information unavailable");
            return;
        }
    };
    let mins = if no_units { "" } else { " mins" };
    for &flag in flags {
        match flag {
            BatteryStat::Count => {
                if let Ok(batteries) = manager.batteries() {
                    let _ = write!(out, "BATTERY_COUNT=\"{}\" ", batteries.count());
                }
            }
            BatteryStat::Percentage => {
                let pct = if no_units { "" } else { "%" };
                let _ = write!(
                    out,
                    "BATTERY_PERCENTAGE=\"{:.2}{pct}\" ",
                    bat.state_of_charge().get::<battery::units::ratio::percent>()
                );
            }
            BatteryStat::State => {
                let _ = write!(out, "BATTERY_STATE=\"{}\" ", bat.state());
            }
            BatteryStat::TimeToEmpty => match bat.time_to_empty() {
                Some(time) => {
                    let minutes = time.get::<battery::units::time::second>() / 60.0;
                    let _ = write!(out, "BATTERY_TIME_TO_EMPTY=\"{minutes:.0}{mins}\" ");
                }
                None => {
                    let _ = write!(out, "BATTERY_TIME_TO_EMPTY=\"N/A\" ");
                }
            },
            BatteryStat::TimeToFull => match bat.time_to_full() {
                Some(time) => {
                    let minutes = time.get::<battery::units::time::second>() / 60.0;
                    let _ = write!(out, "BATTERY_TIME_TO_FULL=\"{minutes:.0}{mins}\" ");
                }
                None => {
                    let _ = write!(out, "BATTERY_TIME_TO_FULL=\"N/A\" ");
                }
            },
        }
    }
}

fn first_battery() -> battery::Result<(battery::Manager, battery::Battery)> {
    let manager = battery::Manager::new()?;
    let mut bat = match manager.batteries()?.next() {
        Some(bat) => bat?,
        None => return Err(std::io::Error::from(std::io::ErrorKind::NotFound).into()),
    };
    manager.refresh(&mut bat)?;
    Ok((manager, bat))
}

fn system_stats(flags: &[SystemStat], out: &mut String) {
    for &flag in flags {
        match flag {
            SystemStat::Arch => {
                let _ = write!(out, "ARCH=\"{}\" ", System::cpu_arch());
            }
            SystemStat::Distro => {
                let _ = write!(out, "DISTRO=\"{}\" ", System::distribution_id());
            }
            SystemStat::HostName => {
                let _ = write!(
                    out,
                    "HOST_NAME=\"{}\" ",
                    System::host_name().unwrap_or_default()
                );
            }
            SystemStat::KernelVersion => {
                let _ = write!(
                    out,
                    "KERNEL_VERSION=\"{}\" ",
                    System::kernel_version().unwrap_or_default()
                );
            }
            SystemStat::Name => {
                let _ = write!(out, "SYSTEM_NAME=\"{}\" ", System::name().unwrap_or_default());
            }
            SystemStat::OsVersion => {
                let _ = write!(
                    out,
                    "OS_VERSION=\"{}\" ",
                    System::os_version().unwrap_or_default()
                );
            }
            SystemStat::LongOsVersion => {
                let _ = write!(
                    out,
                    "LONG_OS_VERSION=\"{}\" ",
                    System::long_os_version().unwrap_or_default()
                );
            }
        }
    }
}

/// Average temperature over CPU-adjacent sensors, if the host exposes
/// any.
fn cpu_temperature() -> Option<f32> {
    let components = Components::new_with_refreshed_list();
    let readings: Vec<f32> = components
        .iter()
        .filter(|c| CPU_SENSOR_LABELS.iter().any(|label| c.label().contains(label)))
        .filter_map(|c| c.temperature())
        .collect();
    if readings.is_empty() {
        return None;
    }
    Some(readings.iter().sum::<f32>() / readings.len() as f32)
}

/// Renders seconds-since-boot as a compound string over the requested
/// units, largest first, skipping leading zero units (`1w 2d 3h 4m 5s`).
/// A zero uptime renders as `0` of the smallest requested unit.
fn uptime_stats(uptime_secs: u64, units: &[UptimeUnit], out: &mut String) {
    let mut units: Vec<UptimeUnit> = units.to_vec();
    units.sort();
    units.dedup();

    let _ = write!(out, "UPTIME=\"");
    let mut remaining = uptime_secs;
    let mut wrote = false;
    for &unit in &units {
        let seconds = unit_seconds(unit);
        if remaining >= seconds {
            if wrote {
                let _ = write!(out, " ");
            }
            let _ = write!(out, "{}{}", remaining / seconds, unit_suffix(unit));
            remaining %= seconds;
            wrote = true;
        }
    }
    if !wrote {
        let suffix = units.last().map_or("s", |&unit| unit_suffix(unit));
        let _ = write!(out, "0{suffix}");
    }
    let _ = write!(out, "\" ");
}

fn unit_seconds(unit: UptimeUnit) -> u64 {
    match unit {
        UptimeUnit::Week => 7 * 24 * 3600,
        UptimeUnit::Day => 24 * 3600,
        UptimeUnit::Hour => 3600,
        UptimeUnit::Min => 60,
        UptimeUnit::Sec => 1,
    }
}

fn unit_suffix(unit: UptimeUnit) -> &'static str {
    match unit {
        UptimeUnit::Week => "w",
        UptimeUnit::Day => "d",
        UptimeUnit::Hour => "h",
        UptimeUnit::Min => "m",
        UptimeUnit::Sec => "s",
    }
}

fn gigabytes(bytes: u64) -> f32 {
    bytes as f32 / BYTES_PER_GB
}

fn percentage(used: u64, total: u64) -> u32 {
    if total == 0 {
        return 0;
    }
    ((used as f32 / total as f32) * 100.0).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn percentage_handles_zero_total() {
        assert_eq!(percentage(10, 0), 0);
        assert_eq!(percentage(1, 4), 25);
    }

    #[test]
    fn uptime_skips_leading_zero_units() {
        let mut out = String::new();
        uptime_stats(3 * 24 * 3600 + 4 * 3600 + 5 * 60 + 6, &ALL_UPTIME, &mut out);
        assert_eq!(out, "UPTIME=\"3d 4h 5m 6s\" ");
    }

    #[test]
    fn uptime_respects_the_requested_units() {
        let mut out = String::new();
        uptime_stats(90 * 60, &[UptimeUnit::Min], &mut out);
        assert_eq!(out, "UPTIME=\"90m\" ");
    }

    #[test]
    fn zero_uptime_renders_the_smallest_unit() {
        let mut out = String::new();
        uptime_stats(0, &[UptimeUnit::Hour, UptimeUnit::Min], &mut out);
        assert_eq!(out, "UPTIME=\"0m\" ");
    }

    #[test]
    fn collect_emits_one_variable_per_requested_stat() {
        let args = Args::parse_from(["barstats", "--cpu", "count", "usage", "--uptime"]);
        let mut sampler = Sampler::new(false);
        let vars = sampler.collect(&args);
        let keys: Vec<&str> = vars
            .split("\" ")
            .map(|var| var.split('=').next().unwrap())
            .collect();
        assert_eq!(keys, ["CPU_COUNT", "CPU_USAGE", "UPTIME"]);
    }

    #[test]
    fn system_group_emits_identity_variables() {
        let mut out = String::new();
        system_stats(&[SystemStat::Arch, SystemStat::Distro], &mut out);
        assert!(out.starts_with("ARCH=\""));
        assert!(out.contains("DISTRO=\""));
    }

    #[test]
    fn unknown_network_interfaces_are_skipped() {
        let sampler = Sampler::new(false);
        let mut out = String::new();
        let names = vec!["surely-no-such-interface".to_owned()];
        sampler.network_stats(Some(&names), 5, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn battery_group_never_panics_without_a_battery() {
        let args = Args::parse_from(["barstats", "--battery", "percentage", "state"]);
        let mut sampler = Sampler::new(false);
        // Hosts without a battery just get no BATTERY_ variables.
        let vars = sampler.collect(&args);
        assert!(vars.is_empty() || vars.starts_with("BATTERY_"));
    }

    #[test]
    fn no_units_strips_suffixes() {
        let args = Args::parse_from(["barstats", "--no-units", "--memory", "ram-usage"]);
        let mut sampler = Sampler::new(args.no_units);
        let vars = sampler.collect(&args);
        assert!(vars.starts_with("RAM_USAGE=\""));
        assert!(!vars.contains('%'));
    }
}
