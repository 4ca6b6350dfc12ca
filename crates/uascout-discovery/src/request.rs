//! Discovery requests and their scan plans.
//!
//! A [`DiscoveryRequest`] resolves a submitted request model against the local
//! network environment once, into an immutable plan of address and port
//! ranges, and pairs it with a cancellation token.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uascout_core::{DiscoveryConfigModel, DiscoveryMode, DiscoveryRequestModel};
use uascout_net::{AddressRange, NetInterface, PortRange};

/// Default idle time between periodic scans
pub const DEFAULT_IDLE_TIME_BETWEEN_SCANS: Duration = Duration::from_secs(6 * 60 * 60);

/// Idle time used when a finished scan request does not carry one
pub const FALLBACK_IDLE_TIME_BETWEEN_SCANS: Duration = Duration::from_secs(60 * 60);

/// Default timeout of a port probe
pub const DEFAULT_PORT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout of a network probe
pub const DEFAULT_NETWORK_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Default maximum of concurrent network probes
pub const DEFAULT_MAX_NETWORK_PROBES: usize = 1000;

/// Default maximum of concurrent port probes
pub const DEFAULT_MAX_PORT_PROBES: usize = 1000;

/// Default lower bound of port probes in percent of the maximum
pub const DEFAULT_MIN_PORT_PROBES_PERCENT: u32 = 10;

/// Snapshot of the local network a request is resolved against.
#[derive(Debug, Clone, Default)]
pub struct ScanEnvironment {
    pub interfaces: Vec<NetInterface>,
    /// Address of the container host when running in a container
    pub container_host: Option<Ipv4Addr>,
}

#[derive(Debug)]
struct ScanPlan {
    request: DiscoveryRequestModel,
    mode: DiscoveryMode,
    configuration: DiscoveryConfigModel,
    address_ranges: Vec<AddressRange>,
    port_ranges: Vec<PortRange>,
    total_addresses: u64,
    total_ports: u64,
    container_host: Option<Ipv4Addr>,
}

/// A resolved discovery request.
#[derive(Debug)]
pub struct DiscoveryRequest {
    plan: Arc<ScanPlan>,
    token: CancellationToken,
    is_scan: bool,
}

impl DiscoveryRequest {
    /// Resolves `model` against `env`.
    pub fn new(model: DiscoveryRequestModel, env: &ScanEnvironment) -> Self {
        Self {
            plan: Arc::new(ScanPlan::resolve(model, env)),
            token: CancellationToken::new(),
            is_scan: false,
        }
    }

    /// Creates a fresh request sharing this request's plan.
    pub fn renew(&self) -> Self {
        Self {
            plan: self.plan.clone(),
            token: CancellationToken::new(),
            is_scan: self.is_scan,
        }
    }

    /// Flags the request as a periodic scan.
    pub fn into_scan(mut self) -> Self {
        self.is_scan = true;
        self
    }

    /// The request as submitted, with its configuration replaced by the
    /// resolved one.
    pub fn model(&self) -> &DiscoveryRequestModel {
        &self.plan.request
    }

    pub fn id(&self) -> Option<&str> {
        self.plan.request.id.as_deref()
    }

    pub fn mode(&self) -> DiscoveryMode {
        self.plan.mode
    }

    pub fn configuration(&self) -> &DiscoveryConfigModel {
        &self.plan.configuration
    }

    pub fn address_ranges(&self) -> &[AddressRange] {
        &self.plan.address_ranges
    }

    pub fn port_ranges(&self) -> &[PortRange] {
        &self.plan.port_ranges
    }

    pub fn total_addresses(&self) -> u64 {
        self.plan.total_addresses
    }

    pub fn total_ports(&self) -> u64 {
        self.plan.total_ports
    }

    pub fn container_host(&self) -> Option<Ipv4Addr> {
        self.plan.container_host
    }

    pub fn is_scan(&self) -> bool {
        self.is_scan
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn network_probe_timeout(&self) -> Duration {
        self.plan
            .configuration
            .network_probe_timeout()
            .unwrap_or(DEFAULT_NETWORK_PROBE_TIMEOUT)
    }

    pub fn port_probe_timeout(&self) -> Duration {
        self.plan
            .configuration
            .port_probe_timeout()
            .unwrap_or(DEFAULT_PORT_PROBE_TIMEOUT)
    }

    pub fn max_network_probes(&self) -> usize {
        self.plan
            .configuration
            .max_network_probes
            .unwrap_or(DEFAULT_MAX_NETWORK_PROBES)
    }

    pub fn max_port_probes(&self) -> usize {
        self.plan
            .configuration
            .max_port_probes
            .unwrap_or(DEFAULT_MAX_PORT_PROBES)
    }

    pub fn min_port_probes_percent(&self) -> u32 {
        self.plan
            .configuration
            .min_port_probes_percent
            .unwrap_or(DEFAULT_MIN_PORT_PROBES_PERCENT)
    }

    pub fn idle_time_between_scans(&self) -> Duration {
        self.plan
            .configuration
            .idle_time_between_scans()
            .unwrap_or(FALLBACK_IDLE_TIME_BETWEEN_SCANS)
    }
}

impl ScanPlan {
    fn resolve(mut request: DiscoveryRequestModel, env: &ScanEnvironment) -> Self {
        let Some(mut configuration) = request.configuration.take() else {
            let mut configuration = DiscoveryConfigModel::default();
            fill_defaults(&mut configuration);
            request.discovery = Some(DiscoveryMode::Off);
            request.configuration = Some(configuration.clone());
            return Self {
                request,
                mode: DiscoveryMode::Off,
                configuration,
                address_ranges: Vec::new(),
                port_ranges: Vec::new(),
                total_addresses: 0,
                total_ports: 0,
                container_host: env.container_host,
            };
        };

        let explicit_ports = configuration
            .port_ranges_to_scan
            .as_deref()
            .and_then(|ranges_text| parse_ranges("port", ranges_text, PortRange::parse));
        let explicit_addresses = configuration
            .address_ranges_to_scan
            .as_deref()
            .and_then(|ranges_text| parse_ranges("address", ranges_text, AddressRange::parse));

        let mode = match request.discovery {
            Some(mode) => mode,
            None if explicit_ports.is_some() || explicit_addresses.is_some() => DiscoveryMode::Fast,
            None => DiscoveryMode::Off,
        };

        let port_ranges = explicit_ports.unwrap_or_else(|| ports_for_mode(mode));
        let mut address_ranges =
            explicit_addresses.unwrap_or_else(|| addresses_for_mode(mode, &env.interfaces));

        if mode.is_scanning() {
            if let Some(host) = env.container_host {
                address_ranges.push(AddressRange::single(host).with_nic("container-host"));
            }
        }
        let address_ranges = AddressRange::merge(address_ranges);

        fill_defaults(&mut configuration);
        configuration.address_ranges_to_scan =
            (!address_ranges.is_empty()).then(|| AddressRange::format(&address_ranges));
        configuration.port_ranges_to_scan =
            (!port_ranges.is_empty()).then(|| PortRange::format(&port_ranges));

        request.discovery = Some(mode);
        request.configuration = Some(configuration.clone());

        Self {
            total_addresses: AddressRange::total(&address_ranges),
            total_ports: PortRange::total(&port_ranges),
            request,
            mode,
            configuration,
            address_ranges,
            port_ranges,
            container_host: env.container_host,
        }
    }
}

fn parse_ranges<T>(
    kind: &str,
    ranges_text: &str,
    parse: impl Fn(&str) -> Result<Vec<T>, uascout_core::ParseError>,
) -> Option<Vec<T>> {
    match parse(ranges_text) {
        Ok(ranges) if !ranges.is_empty() => Some(ranges),
        Ok(_) => None,
        Err(e) => {
            warn!(kind, ranges_text, error = %e, "Ignoring invalid ranges to scan");
            None
        }
    }
}

fn fill_defaults(configuration: &mut DiscoveryConfigModel) {
    configuration
        .idle_time_between_scans_secs
        .get_or_insert(DEFAULT_IDLE_TIME_BETWEEN_SCANS.as_secs());
    configuration
        .port_probe_timeout_ms
        .get_or_insert(DEFAULT_PORT_PROBE_TIMEOUT.as_millis() as u64);
    configuration
        .network_probe_timeout_ms
        .get_or_insert(DEFAULT_NETWORK_PROBE_TIMEOUT.as_millis() as u64);
}

fn ports_for_mode(mode: DiscoveryMode) -> Vec<PortRange> {
    match mode {
        DiscoveryMode::Local => PortRange::all(),
        DiscoveryMode::Fast => PortRange::well_known(),
        DiscoveryMode::Network => PortRange::opcua(),
        DiscoveryMode::Scan => PortRange::unassigned(),
        DiscoveryMode::Url | DiscoveryMode::Off => Vec::new(),
    }
}

fn addresses_for_mode(mode: DiscoveryMode, interfaces: &[NetInterface]) -> Vec<AddressRange> {
    let subnets = |full: bool| {
        interfaces
            .iter()
            .map(|iface| AddressRange::from_interface(iface, full))
            .collect::<Vec<_>>()
    };
    let gateways = || {
        interfaces.iter().filter_map(|iface| {
            iface
                .gateway
                .map(|gw| AddressRange::single(gw).with_nic(iface.name.clone()))
        })
    };

    match mode {
        DiscoveryMode::Local => subnets(true),
        DiscoveryMode::Fast => {
            let mut ranges = subnets(false);
            ranges.extend(gateways());
            ranges
        }
        DiscoveryMode::Network | DiscoveryMode::Scan => {
            let mut ranges = subnets(true);
            ranges.extend(gateways());
            ranges
        }
        DiscoveryMode::Url | DiscoveryMode::Off => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> ScanEnvironment {
        ScanEnvironment {
            interfaces: vec![NetInterface {
                name: "eth0".to_string(),
                address: Ipv4Addr::new(10, 1, 2, 3),
                prefix_len: 16,
                gateway: Some(Ipv4Addr::new(10, 1, 0, 1)),
            }],
            container_host: None,
        }
    }

    fn request(mode: Option<DiscoveryMode>, config: DiscoveryConfigModel) -> DiscoveryRequestModel {
        DiscoveryRequestModel {
            id: Some("req".to_string()),
            discovery: mode,
            configuration: Some(config),
            context: None,
        }
    }

    #[test]
    fn test_missing_configuration_forces_off() {
        let model = DiscoveryRequestModel {
            discovery: Some(DiscoveryMode::Scan),
            ..Default::default()
        };
        let request = DiscoveryRequest::new(model, &env());
        assert_eq!(request.mode(), DiscoveryMode::Off);
        assert!(request.address_ranges().is_empty());
        assert!(request.port_ranges().is_empty());
        assert_eq!(request.model().discovery, Some(DiscoveryMode::Off));
    }

    #[test]
    fn test_explicit_ranges_default_to_fast() {
        let config = DiscoveryConfigModel {
            address_ranges_to_scan: Some("192.168.0.0/30".to_string()),
            port_ranges_to_scan: Some("4840".to_string()),
            ..Default::default()
        };
        let request = DiscoveryRequest::new(request(None, config), &env());

        assert_eq!(request.mode(), DiscoveryMode::Fast);
        assert_eq!(request.total_addresses(), 4);
        assert_eq!(request.total_ports(), 1);
        assert_eq!(
            request.configuration().address_ranges_to_scan.as_deref(),
            Some("192.168.0.0/30")
        );
    }

    #[test]
    fn test_invalid_ranges_fall_back_to_mode() {
        let config = DiscoveryConfigModel {
            port_ranges_to_scan: Some("not-a-port".to_string()),
            ..Default::default()
        };
        let request = DiscoveryRequest::new(request(Some(DiscoveryMode::Network), config), &env());
        assert_eq!(request.port_ranges(), PortRange::opcua().as_slice());
        assert_eq!(
            request.configuration().port_ranges_to_scan.as_deref(),
            Some(PortRange::format(&PortRange::opcua()).as_str())
        );
    }

    #[test]
    fn test_fast_mode_uses_24_and_gateway() {
        let request = DiscoveryRequest::new(
            request(Some(DiscoveryMode::Fast), DiscoveryConfigModel::default()),
            &env(),
        );
        // 10.1.2.1-254 plus the gateway outside that /24
        assert_eq!(request.total_addresses(), 255);
        assert_eq!(request.port_ranges(), PortRange::well_known().as_slice());
    }

    #[test]
    fn test_mode_port_presets() {
        let ports = |mode| {
            DiscoveryRequest::new(request(Some(mode), DiscoveryConfigModel::default()), &env())
                .port_ranges()
                .to_vec()
        };
        assert_eq!(ports(DiscoveryMode::Local), PortRange::all());
        assert_eq!(ports(DiscoveryMode::Scan), PortRange::unassigned());
        assert!(ports(DiscoveryMode::Url).is_empty());
    }

    #[test]
    fn test_local_mode_scans_full_subnet() {
        let request = DiscoveryRequest::new(
            request(Some(DiscoveryMode::Local), DiscoveryConfigModel::default()),
            &env(),
        );
        assert_eq!(request.total_addresses(), 65534);
    }

    #[test]
    fn test_container_host_added_for_scanning_modes() {
        let mut env = env();
        env.container_host = Some(Ipv4Addr::new(172, 17, 0, 1));

        let scan = DiscoveryRequest::new(
            request(Some(DiscoveryMode::Fast), DiscoveryConfigModel::default()),
            &env,
        );
        assert!(scan
            .address_ranges()
            .iter()
            .any(|r| r.contains(Ipv4Addr::new(172, 17, 0, 1))));

        let url = DiscoveryRequest::new(
            request(Some(DiscoveryMode::Url), DiscoveryConfigModel::default()),
            &env,
        );
        assert!(url.address_ranges().is_empty());
    }

    #[test]
    fn test_defaults_filled() {
        let request = DiscoveryRequest::new(
            request(Some(DiscoveryMode::Url), DiscoveryConfigModel::default()),
            &env(),
        );
        assert_eq!(request.idle_time_between_scans(), DEFAULT_IDLE_TIME_BETWEEN_SCANS);
        assert_eq!(request.port_probe_timeout(), Duration::from_secs(5));
        assert_eq!(request.network_probe_timeout(), Duration::from_secs(3));
        assert_eq!(request.max_port_probes(), DEFAULT_MAX_PORT_PROBES);
        assert_eq!(request.min_port_probes_percent(), 10);
    }

    #[test]
    fn test_renew_shares_plan_with_fresh_token() {
        let original = DiscoveryRequest::new(
            request(Some(DiscoveryMode::Fast), DiscoveryConfigModel::default()),
            &env(),
        )
        .into_scan();
        original.cancel();

        let renewed = original.renew();
        assert!(!renewed.is_cancelled());
        assert!(renewed.is_scan());
        assert!(Arc::ptr_eq(&original.plan, &renewed.plan));
    }
}
