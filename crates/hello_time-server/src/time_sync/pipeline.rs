use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::envelope::{self, Envelope};
use crate::error::{DecodeStage, TimeSyncError, ValidationError};
use crate::protocol::{self, TimePacket};
use crate::unix_time;

use super::drift;
use super::events::{EventLogger, RequestEvent};
use super::flags::{FeatureFlags, GroupMembership, PRINT_RAW_PB, StaticFeatureFlags, StaticGroups};
use super::identity::{DeviceIdentity, FeatureContext};
use super::key_resolver::KeyResolver;
use super::key_store::KeyStore;
use super::metrics::{Counter, Histogram, MetricsSink};
use super::network::IpNet;

/// Firmware version reported when the header is absent.
pub const FIRMWARE_DEFAULT: &str = "0";

/// One inbound time request, as handed over by the transport.
#[derive(Clone, Debug)]
pub struct TimeSyncRequest<'a> {
    /// Raw request body (a signed envelope).
    pub body: &'a [u8],
    /// Device identifier header, if sent.
    pub device_id: Option<&'a str>,
    /// Top board firmware version header, if sent.
    pub top_fw: Option<&'a str>,
    /// Middle board firmware version header, if sent.
    pub middle_fw: Option<&'a str>,
    /// Source address of the request, if known.
    pub source_ip: Option<IpAddr>,
    /// Server time at request arrival.
    pub received_at: unix_time::Instant,
}

impl<'a> TimeSyncRequest<'a> {
    /// A request with no headers, received now.
    pub fn new(body: &'a [u8]) -> Self {
        TimeSyncRequest {
            body,
            device_id: None,
            top_fw: None,
            middle_fw: None,
            source_ip: None,
            received_at: unix_time::Instant::now(),
        }
    }

    /// Set the device identifier header.
    pub fn device_id(mut self, device_id: &'a str) -> Self {
        self.device_id = Some(device_id);
        self
    }

    /// Set the firmware version headers.
    pub fn firmware(mut self, top: Option<&'a str>, middle: Option<&'a str>) -> Self {
        self.top_fw = top;
        self.middle_fw = middle;
        self
    }

    /// Set the source address.
    pub fn source_ip(mut self, ip: IpAddr) -> Self {
        self.source_ip = Some(ip);
        self
    }

    /// Override the arrival time.
    pub fn received_at(mut self, at: unix_time::Instant) -> Self {
        self.received_at = at;
        self
    }
}

// What the request revealed before it finished, for the audit record.
#[derive(Default)]
struct RequestTrace {
    drift_seconds: Option<i64>,
}

/// The time sync orchestrator: envelope in, signed envelope out.
pub struct TimeSyncService {
    resolver: KeyResolver,
    flags: Arc<dyn FeatureFlags>,
    groups: Arc<dyn GroupMembership>,
    metrics: Option<Arc<dyn MetricsSink>>,
    events: Option<Arc<dyn EventLogger>>,
    drift_tolerance_hours: i64,
    call_timeout: Duration,
    max_response_size: usize,
}

/// Builder for [`TimeSyncService`].
pub struct TimeSyncServiceBuilder {
    key_store: Arc<dyn KeyStore>,
    flags: Arc<dyn FeatureFlags>,
    groups: Arc<dyn GroupMembership>,
    metrics: Option<Arc<dyn MetricsSink>>,
    events: Option<Arc<dyn EventLogger>>,
    office_ranges: Vec<IpNet>,
    drift_tolerance_hours: i64,
    call_timeout: Duration,
    max_response_size: usize,
}

impl TimeSyncServiceBuilder {
    /// Set the feature flag client (default: no flags active).
    pub fn flags(mut self, flags: Arc<dyn FeatureFlags>) -> Self {
        self.flags = flags;
        self
    }

    /// Set the group membership lookup (default: no groups).
    pub fn groups(mut self, groups: Arc<dyn GroupMembership>) -> Self {
        self.groups = groups;
        self
    }

    /// Set the metrics sink.
    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Set the audit event logger.
    pub fn events(mut self, events: Arc<dyn EventLogger>) -> Self {
        self.events = Some(events);
        self
    }

    /// Add an office network for the default-factory override.
    pub fn office_range(mut self, network: IpNet) -> Self {
        self.office_ranges.push(network);
        self
    }

    /// Replace the office networks.
    pub fn office_ranges(mut self, networks: Vec<IpNet>) -> Self {
        self.office_ranges = networks;
        self
    }

    /// Set the clock drift tolerance (default: 2 hours).
    pub fn drift_tolerance_hours(mut self, hours: i64) -> Self {
        self.drift_tolerance_hours = hours;
        self
    }

    /// Set the timeout for group lookups (default: 200 ms).
    ///
    /// Key store calls are bounded by the store itself.
    pub fn external_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set the response size above which a warning is logged (default: 2048 bytes).
    pub fn max_response_size(mut self, bytes: usize) -> Self {
        self.max_response_size = bytes;
        self
    }

    /// Build the service.
    pub fn build(self) -> TimeSyncService {
        TimeSyncService {
            resolver: KeyResolver::new(self.key_store, self.flags.clone(), self.office_ranges),
            flags: self.flags,
            groups: self.groups,
            metrics: self.metrics,
            events: self.events,
            drift_tolerance_hours: self.drift_tolerance_hours,
            call_timeout: self.call_timeout,
            max_response_size: self.max_response_size,
        }
    }
}

impl TimeSyncService {
    /// Start building a service that resolves keys from `key_store`.
    pub fn builder(key_store: Arc<dyn KeyStore>) -> TimeSyncServiceBuilder {
        TimeSyncServiceBuilder {
            key_store,
            flags: Arc::new(StaticFeatureFlags::default()),
            groups: Arc::new(StaticGroups::default()),
            metrics: None,
            events: None,
            office_ranges: Vec::new(),
            drift_tolerance_hours: drift::DEFAULT_TOLERANCE_HOURS,
            call_timeout: Duration::from_millis(200),
            max_response_size: protocol::MAX_RESPONSE_SIZE,
        }
    }

    /// Handle one time request.
    ///
    /// On success the signed response envelope is returned. Every failure is logged
    /// with the device identity and a reason code, counted, and audited.
    pub async fn handle(&self, req: TimeSyncRequest<'_>) -> Result<Vec<u8>, TimeSyncError> {
        self.count(Counter::RequestsReceived);

        let identity = DeviceIdentity::from_header(req.device_id);
        let top_fw = req.top_fw.unwrap_or(FIRMWARE_DEFAULT);
        let middle_fw = req.middle_fw.unwrap_or(FIRMWARE_DEFAULT);
        debug!(
            device_id = %identity,
            top_fw,
            middle_fw,
            ip = ?req.source_ip,
            "action=request-time"
        );

        let mut trace = RequestTrace::default();
        let result = self.process(&req, &identity, &mut trace).await;

        let (status, outcome) = match &result {
            Ok(signed) => {
                self.count(Counter::ResponsesSent);
                self.observe(Histogram::ResponseBytes, signed.len() as i64);
                (200, "ok")
            }
            Err(err) => {
                error!(
                    device_id = %identity,
                    reason = err.reason(),
                    top_fw,
                    middle_fw,
                    error = %err,
                    "action=request-time"
                );
                self.count(match err {
                    TimeSyncError::Decode { .. } | TimeSyncError::Validation(_) => {
                        Counter::BadRequests
                    }
                    TimeSyncError::Auth(_) => Counter::Unauthorized,
                    TimeSyncError::Signing(_) => Counter::InternalErrors,
                });
                (err.status().as_u16(), err.reason())
            }
        };

        if let Some(events) = &self.events {
            events.log(RequestEvent {
                device_id: identity.to_string(),
                ip: req.source_ip.map(|ip| ip.to_string()),
                top_fw: top_fw.to_string(),
                middle_fw: middle_fw.to_string(),
                received_at: drift::to_datetime(req.received_at),
                status,
                outcome,
                drift_seconds: trace.drift_seconds,
                response_bytes: result.as_ref().ok().map(Vec::len),
            });
        }

        result
    }

    async fn process(
        &self,
        req: &TimeSyncRequest<'_>,
        identity: &DeviceIdentity,
        trace: &mut RequestTrace,
    ) -> Result<Vec<u8>, TimeSyncError> {
        // 1. Split the envelope.
        let envelope = Envelope::parse(req.body).map_err(|source| TimeSyncError::Decode {
            stage: DecodeStage::Envelope,
            source,
        })?;

        // 2. Decode the body.
        let request = envelope
            .decode_body()
            .map_err(|source| TimeSyncError::Decode {
                stage: DecodeStage::Body,
                source,
            })?;

        // 3. The device clock reading is mandatory.
        let Some(origin) = request.origin_timestamp() else {
            return Err(ValidationError::EmptyOriginTimestamp.into());
        };

        // 4. Group context for flag evaluation.
        let ctx = self.feature_context(identity, req.source_ip).await;
        if self
            .flags
            .is_active(PRINT_RAW_PB, identity.as_str(), &ctx.device_groups)
        {
            debug!(device_id = %identity, raw = %hex::encode(req.body), "action=raw-pb");
        }

        // 5. Resolve the key.
        let key = self.resolver.resolve(&ctx).await?;

        // 6. Verify the tag.
        envelope.verify(key.key())?;

        // 7. Drift between the device clock and arrival time (advisory).
        let reference = drift::to_datetime(req.received_at);
        let sample = drift::to_datetime(unix_time::timestamp_to_instant(origin, &req.received_at));
        let drift_secs = drift::drift_seconds(sample, reference);
        trace.drift_seconds = Some(drift_secs);
        self.observe(Histogram::DriftSeconds, drift_secs);
        if drift::is_out_of_sync(sample, reference, self.drift_tolerance_hours) {
            self.count(Counter::ClockOutOfSync);
            info!(
                device_id = %identity,
                drift_seconds = drift_secs,
                "action=clock-out-of-sync"
            );
        }

        // 8. Build the response; transmit time is never before receive time.
        let transmit_at = unix_time::Instant::now().max(req.received_at);
        let response = TimePacket {
            reference_ts: request.reference_ts,
            origin_ts: request.origin_ts,
            receive_ts: Some(protocol::TimestampFormat::from(req.received_at).into()),
            transmit_ts: Some(protocol::TimestampFormat::from(transmit_at).into()),
        };

        // 9. Sign with the verifying key.
        let signed = envelope::sign(&envelope::encode_packet(&response), key.key())?;

        // 10. Oversized responses are still sent.
        if signed.len() > self.max_response_size {
            self.count(Counter::OversizedResponses);
            warn!(
                device_id = %identity,
                response_size = signed.len(),
                "action=response-too-large"
            );
        }

        Ok(signed)
    }

    async fn feature_context(
        &self,
        identity: &DeviceIdentity,
        source_ip: Option<IpAddr>,
    ) -> FeatureContext {
        let device_groups = self.lookup_groups(identity.as_str()).await;
        let ip_groups = match source_ip {
            Some(ip) => self.lookup_groups(&ip.to_string()).await,
            None => Vec::new(),
        };
        FeatureContext {
            identity: identity.clone(),
            device_groups,
            ip_groups,
            source_ip,
        }
    }

    async fn lookup_groups(&self, member: &str) -> Vec<String> {
        if member.is_empty() {
            return Vec::new();
        }
        match tokio::time::timeout(self.call_timeout, self.groups.get_groups(member)).await {
            Ok(groups) => groups,
            Err(_) => {
                warn!(member, "action=get-groups error=timeout");
                Vec::new()
            }
        }
    }

    fn count(&self, counter: Counter) {
        if let Some(metrics) = &self.metrics {
            metrics.increment(counter);
        }
    }

    fn observe(&self, histogram: Histogram, value: i64) {
        if let Some(metrics) = &self.metrics {
            metrics.record(histogram, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::error::{AuthError, DecodeError};
    use crate::time_sync::flags::{FeatureRule, OFFICE_ONLY_OVERRIDE};
    use crate::time_sync::identity::DEFAULT_FACTORY_DEVICE_ID;
    use crate::time_sync::key_store::{CachedKeyStore, InMemoryKeyBackend};
    use crate::time_sync::metrics::ServerMetrics;

    const DEFAULT_KEY: &[u8; 16] = b"1234567891234567";
    const DEVICE_KEY: &[u8; 16] = b"device-key-00001";

    #[derive(Default)]
    struct CollectingEvents(Mutex<Vec<RequestEvent>>);

    impl EventLogger for CollectingEvents {
        fn log(&self, event: RequestEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    struct SlowGroups;

    #[async_trait]
    impl GroupMembership for SlowGroups {
        async fn get_groups(&self, _id_or_ip: &str) -> Vec<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            vec!["never".to_string()]
        }
    }

    fn store() -> Arc<dyn KeyStore> {
        Arc::new(CachedKeyStore::new(
            InMemoryKeyBackend::default().with_key("DEVICE1", *DEVICE_KEY),
            Duration::from_secs(120),
            Duration::from_secs(1),
            DEFAULT_KEY.to_vec(),
        ))
    }

    fn service() -> (TimeSyncService, Arc<ServerMetrics>, Arc<CollectingEvents>) {
        let metrics = Arc::new(ServerMetrics::new());
        let events = Arc::new(CollectingEvents::default());
        let mut rules = HashMap::new();
        rules.insert(
            OFFICE_ONLY_OVERRIDE.to_string(),
            FeatureRule {
                devices: vec![DEFAULT_FACTORY_DEVICE_ID.to_string()],
                groups: vec![],
            },
        );
        let svc = TimeSyncService::builder(store())
            .flags(Arc::new(StaticFeatureFlags::new(rules)))
            .metrics(metrics.clone())
            .events(events.clone())
            .office_range("199.87.82.0/24".parse().unwrap())
            .build();
        (svc, metrics, events)
    }

    fn now_ts() -> u64 {
        protocol::TimestampFormat::from(unix_time::Instant::now()).into()
    }

    fn signed_request(packet: &TimePacket, key: &[u8]) -> Vec<u8> {
        envelope::sign(&envelope::encode_packet(packet), key).unwrap()
    }

    fn valid_packet() -> TimePacket {
        TimePacket {
            reference_ts: Some(0xE000_0000_0000_0001),
            origin_ts: Some(now_ts()),
            ..TimePacket::default()
        }
    }

    // ── Success path ────────────────────────────────────────────────

    #[tokio::test]
    async fn test_round_trip_with_device_key() {
        let (svc, metrics, events) = service();
        let packet = valid_packet();
        let body = signed_request(&packet, DEVICE_KEY);
        let arrival = unix_time::Instant::now();

        let signed = svc
            .handle(TimeSyncRequest::new(&body).device_id("DEVICE1").received_at(arrival))
            .await
            .unwrap();

        let env = Envelope::parse(&signed).unwrap();
        env.verify(DEVICE_KEY).unwrap();
        let response = env.decode_body().unwrap();
        assert_eq!(response.reference_ts, packet.reference_ts);
        assert_eq!(response.origin_ts, packet.origin_ts);
        let receive = response.receive_ts.unwrap();
        let transmit = response.transmit_ts.unwrap();
        assert_eq!(receive, u64::from(protocol::TimestampFormat::from(arrival)));
        assert!(transmit >= receive);

        let snap = metrics.snapshot();
        assert_eq!(snap.requests_received, 1);
        assert_eq!(snap.responses_sent, 1);
        assert_eq!(snap.clock_out_of_sync, 0);
        assert_eq!(snap.response_bytes.count, 1);

        let events = events.0.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].outcome, "ok");
        assert_eq!(events[0].device_id, "DEVICE1");
        assert_eq!(events[0].top_fw, FIRMWARE_DEFAULT);
        assert_eq!(events[0].response_bytes, Some(signed.len()));
    }

    #[tokio::test]
    async fn test_unknown_device_uses_default_key() {
        let (svc, _, _) = service();
        let body = signed_request(&valid_packet(), DEFAULT_KEY);
        let signed = svc.handle(TimeSyncRequest::new(&body)).await.unwrap();
        Envelope::parse(&signed).unwrap().verify(DEFAULT_KEY).unwrap();
    }

    #[tokio::test]
    async fn test_missing_reference_ts_is_echoed_absent() {
        let (svc, _, _) = service();
        let packet = TimePacket {
            origin_ts: Some(now_ts()),
            ..TimePacket::default()
        };
        let body = signed_request(&packet, DEVICE_KEY);
        let signed = svc
            .handle(TimeSyncRequest::new(&body).device_id("DEVICE1"))
            .await
            .unwrap();
        let response = Envelope::parse(&signed).unwrap().decode_body().unwrap();
        assert_eq!(response.reference_ts, None);
        assert!(response.receive_ts.is_some());
    }

    // ── Rejections ──────────────────────────────────────────────────

    #[tokio::test]
    async fn test_short_envelope_is_bad_request() {
        let (svc, metrics, _) = service();
        let err = svc.handle(TimeSyncRequest::new(b"tiny")).await.unwrap_err();
        assert!(matches!(
            err,
            TimeSyncError::Decode {
                stage: DecodeStage::Envelope,
                source: DecodeError::EnvelopeTooShort { .. }
            }
        ));
        assert_eq!(err.client_message(), "bad request");
        assert_eq!(metrics.snapshot().bad_requests, 1);
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let (svc, _, _) = service();
        let body = envelope::sign(&[0x11, 0x01], DEVICE_KEY).unwrap();
        let err = svc
            .handle(TimeSyncRequest::new(&body).device_id("DEVICE1"))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "bad-body");
        assert_eq!(err.client_message(), "bad request");
    }

    #[tokio::test]
    async fn test_missing_origin_is_bad_request() {
        let (svc, _, events) = service();
        let packet = TimePacket {
            reference_ts: Some(1),
            ..TimePacket::default()
        };
        let body = signed_request(&packet, DEVICE_KEY);
        let err = svc
            .handle(TimeSyncRequest::new(&body).device_id("DEVICE1"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TimeSyncError::Validation(ValidationError::EmptyOriginTimestamp)
        );
        assert_eq!(err.client_message(), "empty origin timestamp");
        let events = events.0.lock().unwrap();
        assert_eq!(events[0].status, 400);
        assert_eq!(events[0].outcome, "empty-origin-ts");
        assert_eq!(events[0].response_bytes, None);
    }

    #[tokio::test]
    async fn test_wrong_key_is_unauthorized() {
        let (svc, metrics, _) = service();
        let body = signed_request(&valid_packet(), DEFAULT_KEY);
        let err = svc
            .handle(TimeSyncRequest::new(&body).device_id("DEVICE1"))
            .await
            .unwrap_err();
        assert_eq!(err, TimeSyncError::Auth(AuthError::TagMismatch));
        assert_eq!(metrics.snapshot().unauthorized, 1);
    }

    #[tokio::test]
    async fn test_factory_outside_office_is_key_failure() {
        let (svc, _, _) = service();
        let body = signed_request(&valid_packet(), DEFAULT_KEY);
        let err = svc
            .handle(
                TimeSyncRequest::new(&body)
                    .device_id(DEFAULT_FACTORY_DEVICE_ID)
                    .source_ip("8.8.8.8".parse().unwrap()),
            )
            .await
            .unwrap_err();
        assert_eq!(err, TimeSyncError::Validation(ValidationError::KeyNotFound));
        assert_eq!(err.client_message(), "");
    }

    #[tokio::test]
    async fn test_factory_inside_office_is_served() {
        let (svc, _, _) = service();
        let body = signed_request(&valid_packet(), DEFAULT_KEY);
        let signed = svc
            .handle(
                TimeSyncRequest::new(&body)
                    .device_id(DEFAULT_FACTORY_DEVICE_ID)
                    .source_ip("199.87.82.114".parse().unwrap()),
            )
            .await
            .unwrap();
        Envelope::parse(&signed).unwrap().verify(DEFAULT_KEY).unwrap();
    }

    #[tokio::test]
    async fn test_misconfigured_fallback_key_fails_verification() {
        let store: Arc<dyn KeyStore> = Arc::new(CachedKeyStore::new(
            InMemoryKeyBackend::default(),
            Duration::from_secs(120),
            Duration::from_secs(1),
            b"short".to_vec(),
        ));
        let svc = TimeSyncService::builder(store).build();
        // An empty body with a zero tag parses, but the packet has no origin_ts.
        let err = svc
            .handle(TimeSyncRequest::new(&[0u8; envelope::TAG_LEN]))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "empty-origin-ts");

        // A packet with origin_ts reaches verification, which rejects the bad key.
        let mut raw = envelope::encode_packet(&TimePacket {
            origin_ts: Some(now_ts()),
            ..TimePacket::default()
        });
        raw.extend_from_slice(&[0u8; envelope::TAG_LEN]);
        let err = svc.handle(TimeSyncRequest::new(&raw)).await.unwrap_err();
        assert_eq!(
            err,
            TimeSyncError::Auth(AuthError::InvalidKeyLength { actual: 5 })
        );
    }

    // ── Advisory checks ─────────────────────────────────────────────

    #[tokio::test]
    async fn test_drift_is_counted_but_not_rejected() {
        let (svc, metrics, events) = service();
        let three_hours_ago = unix_time::Instant::new(unix_time::Instant::now().secs() - 3 * 3600, 0);
        let packet = TimePacket {
            origin_ts: Some(protocol::TimestampFormat::from(three_hours_ago).into()),
            ..TimePacket::default()
        };
        let body = signed_request(&packet, DEVICE_KEY);
        svc.handle(TimeSyncRequest::new(&body).device_id("DEVICE1"))
            .await
            .unwrap();

        let snap = metrics.snapshot();
        assert_eq!(snap.clock_out_of_sync, 1);
        assert_eq!(snap.responses_sent, 1);
        assert!(snap.drift_seconds.min <= -3 * 3600 + 1);
        let drift = events.0.lock().unwrap()[0].drift_seconds.unwrap();
        assert!(drift <= -3 * 3600 + 1);
    }

    #[tokio::test]
    async fn test_oversized_response_is_still_returned() {
        let metrics = Arc::new(ServerMetrics::new());
        let svc = TimeSyncService::builder(store())
            .metrics(metrics.clone())
            .max_response_size(16)
            .build();
        let body = signed_request(&valid_packet(), DEVICE_KEY);
        let signed = svc
            .handle(TimeSyncRequest::new(&body).device_id("DEVICE1"))
            .await
            .unwrap();
        assert!(signed.len() > 16);
        assert_eq!(metrics.snapshot().oversized_responses, 1);
    }

    #[tokio::test]
    async fn test_slow_group_lookup_does_not_block() {
        let svc = TimeSyncService::builder(store())
            .groups(Arc::new(SlowGroups))
            .external_call_timeout(Duration::from_millis(20))
            .build();
        let body = signed_request(&valid_packet(), DEVICE_KEY);
        let started = std::time::Instant::now();
        svc.handle(
            TimeSyncRequest::new(&body)
                .device_id("DEVICE1")
                .source_ip("10.0.0.1".parse().unwrap()),
        )
        .await
        .unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
