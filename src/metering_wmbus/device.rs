use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use chrono::Utc;
use log::{debug, info, warn};
use tokio::sync::mpsc::Sender;
use crate::config::{ConfigError, MeterConfig};
use crate::telegram::{utils, Telegram};
use crate::units::{str_with_unit_hr, Unit};
use super::decryption::DecryptionGate;
use super::frame_decoder;
use super::meter_definitions::{get_meter_family, MeterFamily};
use super::store::{MeasurementSnapshot, MeasurementStore};
use super::structs::DecodeReport;
use super::TelegramError;

/// What subscribers receive after every committed telegram
#[derive(Debug, Clone)]
pub struct MeterUpdate {
    pub meter_name: String,
    pub meter_type: String,
    pub media: String,
    pub id: String,
    pub snapshot: Arc<MeasurementSnapshot>,
}

pub type Observer = Arc<dyn Fn(&MeterUpdate) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Forward updates into a channel; a full channel drops the update
pub fn channel_subscriber(sender: Sender<MeterUpdate>) -> Observer {
    Arc::new(move |update: &MeterUpdate| {
        if let Err(e) = sender.try_send(update.clone()) {
            warn!("Dropping update of {}: {e}", update.meter_name);
        }
    })
}

/// Result of a telegram that made it all the way into the store
#[derive(Debug, Clone)]
pub struct Commit {
    pub report: DecodeReport,
    pub snapshot: Arc<MeasurementSnapshot>,
    /// Problems that did not stop the telegram
    pub warnings: Vec<TelegramError>,
}

/// One configured meter: its identity, key, decoded state and subscribers
pub struct MeterDevice {
    name: String,
    id: String,
    address: [u8; 4],
    key: Option<Vec<u8>>,
    family: Arc<MeterFamily>,
    gate: DecryptionGate,
    store: MeasurementStore,
    observers: Mutex<Vec<(SubscriptionId, Observer)>>,
    next_subscription: AtomicU64,
}

impl MeterDevice {
    pub fn new(name: &str, address: [u8; 4], key: Option<Vec<u8>>, family: Arc<MeterFamily>, gate: DecryptionGate) -> Self {
        MeterDevice {
            name: name.to_string(),
            id: utils::ident_no(&address),
            address,
            key,
            family,
            gate,
            store: MeasurementStore::new(),
            observers: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &MeterConfig) -> Result<Self, ConfigError> {
        let family = get_meter_family(&config.meter_type)
            .ok_or_else(|| ConfigError::UnknownMeterType(config.meter_type.clone()))?;
        let address = config.address()?;
        let key = config.key_bytes()?;
        Ok(MeterDevice::new(&config.name, address, key, family, DecryptionGate::default()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn family(&self) -> &MeterFamily {
        &self.family
    }

    pub fn snapshot(&self) -> Arc<MeasurementSnapshot> {
        self.store.snapshot()
    }

    /// Observers run on the thread handling the telegram, after the store was updated
    pub fn subscribe(&self, observer: Observer) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.lock_observers().push((id, observer));
        return id;
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.lock_observers();
        let before = observers.len();
        observers.retain(|(sid, _)| *sid != id);
        return observers.len() != before;
    }

    fn lock_observers(&self) -> std::sync::MutexGuard<'_, Vec<(SubscriptionId, Observer)>> {
        match self.observers.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn is_telegram_for_me(&self, t: &Telegram) -> bool {
        t.address == self.address
    }

    /// Manufacturer and media the link header announces, checked against the meter family.
    /// Simulated telegrams carry no link header and are taken as they are.
    pub fn identity_warnings(&self, t: &Telegram) -> Vec<TelegramError> {
        let mut warnings = Vec::new();
        if t.is_simulated() {
            return warnings;
        }

        let manufacturer = utils::manufacturer_flag(t.manufacturer);
        if manufacturer != self.family.manufacturer {
            warn!("({}) {} expected manufacturer {} but got {manufacturer}",
                  self.family.meter_type, self.name, self.family.manufacturer);
            warnings.push(TelegramError::UnexpectedManufacturer(manufacturer));
        }

        if t.device_type != self.family.media_code {
            warn!("({}) {} expected media {} but got {} ({:02x})",
                  self.family.meter_type, self.name, utils::get_device_medium(self.family.media_code),
                  utils::get_device_medium(t.device_type), t.device_type);
            warnings.push(TelegramError::UnexpectedMedia(t.device_type));
        }
        return warnings;
    }

    /// Filter, decrypt, decode and commit one telegram.
    /// Nothing in the store changes unless `Ok` is returned.
    pub fn handle_telegram(&self, t: &mut Telegram) -> Result<Commit, TelegramError> {
        if !self.is_telegram_for_me(t) {
            return Err(TelegramError::NotAddressedToMe);
        }

        let prefix = format!("({})", self.family.meter_type);
        debug!("{prefix} {} {}", self.name, hex::encode(t.address));

        let mut warnings = self.identity_warnings(t);
        let plain = self.gate.apply(t, self.key.as_deref()).map_err(TelegramError::DecryptionFailed)?;
        if plain.key_missing {
            warnings.push(TelegramError::MissingKey);
        }
        t.content = plain.bytes;
        debug!("{prefix} log {}", hex::encode(&t.content));

        let decoded = frame_decoder::decode(t, &self.family.registry);
        debug!("{prefix} trace\n{}", t.explain_parse(&prefix, 0));
        let report = decoded?;

        if report.is_truncated() {
            warn!("{prefix} {} {} is shorter than its {}", self.name, self.id, report.layout_name);
            warnings.extend(report.out_of_bounds.iter().cloned().map(TelegramError::OutOfBounds));
        }

        let snapshot = self.store.commit(&report.readings, &self.family.capabilities, Utc::now());
        info!("{prefix} {} {}: {}, {}, {} ({})",
              self.name, self.id,
              str_with_unit_hr(snapshot.total_energy_kwh, Unit::KWH),
              str_with_unit_hr(snapshot.total_volume_m3, Unit::M3),
              str_with_unit_hr(snapshot.current_power_kw, Unit::KW),
              report.layout_name);

        self.notify(&MeterUpdate {
            meter_name: self.name.clone(),
            meter_type: self.family.meter_type.clone(),
            media: self.family.media.clone(),
            id: t.id.clone(),
            snapshot: snapshot.clone(),
        });

        Ok(Commit { report, snapshot, warnings })
    }

    fn notify(&self, update: &MeterUpdate) {
        /* Observers may subscribe or unsubscribe, so they run outside the lock */
        let observers: Vec<Observer> = self.lock_observers().iter().map(|(_, o)| o.clone()).collect();
        for observer in observers {
            observer(update);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use crate::metering_wmbus::decryption::{CipherError, CtrDecryptor};
    use crate::metering_wmbus::frame_decoder::DecodeError;
    use crate::metering_wmbus::meter_definitions::get_meter_family;

    const ADDRESS: [u8; 4] = [0x78, 0x56, 0x34, 0x12];

    struct FailingCipher;

    impl CtrDecryptor for FailingCipher {
        fn decrypt_ctr(&self, _ciphertext: &[u8], _key: &[u8], _iv: &[u8; 16]) -> Result<Vec<u8>, CipherError> {
            Err(CipherError::InvalidLength)
        }
    }

    fn family() -> Arc<MeterFamily> {
        get_meter_family("multical302").unwrap()
    }

    fn device() -> MeterDevice {
        MeterDevice::new("heating", ADDRESS, None, family(), DecryptionGate::default())
    }

    /* As framed off the air from a Kamstrup heat meter */
    fn received(payload: Vec<u8>, address: [u8; 4], iv: [u8; 16]) -> Telegram {
        let mut t = Telegram::new(payload, address, true, iv);
        t.manufacturer = 0x2C2D;
        t.device_type = 0x04;
        return t;
    }

    fn counting(device: &MeterDevice) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        device.subscribe(Arc::new(move |_: &MeterUpdate| { c.fetch_add(1, Ordering::SeqCst); }));
        return count;
    }

    fn short_frame() -> Vec<u8> {
        let mut content = vec![0u8; 16];
        content[0] = 0x4F;
        content[1] = 0x0C;
        content[2] = 0x79;
        content[7] = 0x01;
        content[13] = 0x02;
        return content;
    }

    fn long_frame() -> Vec<u8> {
        let mut content = vec![0x11u8; 26];
        content[2] = 0x78;
        content[24] = 0x0A;
        content[25] = 0x00;
        return content;
    }

    #[test]
    fn test_short_frame_commits_energy_and_volume() {
        let d = device();
        let count = counting(&d);
        let mut t = Telegram::simulated(ADDRESS, short_frame());
        let commit = d.handle_telegram(&mut t).unwrap();

        assert_eq!(commit.snapshot.total_energy_kwh, 1.0);
        assert_eq!(commit.snapshot.total_volume_m3, 2.0);
        assert_eq!(commit.snapshot.current_power_kw, 0.0);
        assert!(commit.warnings.is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let offsets: Vec<(usize, usize)> = t.explanations.iter().map(|e| (e.offset, e.len)).collect();
        assert_eq!(offsets, vec![(0, 2), (2, 1), (3, 4), (7, 3), (10, 3), (13, 3)]);
        assert_eq!(t.explanations[1].info, "79 frame type (short frame)");
        assert_eq!(t.explanations[3].info, "010000 total energy (1)");
    }

    #[test]
    fn test_long_frame_scales_power() {
        let d = device();
        let mut t = Telegram::simulated(ADDRESS, short_frame());
        d.handle_telegram(&mut t).unwrap();

        let mut t = Telegram::simulated(ADDRESS, long_frame());
        let commit = d.handle_telegram(&mut t).unwrap();
        assert_eq!(commit.snapshot.current_power_kw, 1000.0);
        /* The long frame leaves the totals alone */
        assert_eq!(commit.snapshot.total_energy_kwh, 1.0);
        assert_eq!(commit.snapshot.total_volume_m3, 2.0);
        assert_eq!(t.explanations[2].len, 21);
        assert_eq!(t.explanations[3].info, "0a00 current power (1000)");
    }

    #[test]
    fn test_foreign_address_is_ignored() {
        let d = device();
        let count = counting(&d);
        let mut t = Telegram::simulated([0x01, 0x02, 0x03, 0x04], short_frame());

        assert!(matches!(d.handle_telegram(&mut t), Err(TelegramError::NotAddressedToMe)));
        assert_eq!(*d.snapshot(), MeasurementSnapshot::default());
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(t.explanations.is_empty());
    }

    #[test]
    fn test_unknown_frame_type_changes_nothing() {
        let d = device();
        let mut t = Telegram::simulated(ADDRESS, short_frame());
        d.handle_telegram(&mut t).unwrap();
        let before = d.snapshot();
        let count = counting(&d);

        let mut content = short_frame();
        content[2] = 0x7A;
        content[7] = 0x09;
        let mut t = Telegram::simulated(ADDRESS, content);
        assert!(matches!(d.handle_telegram(&mut t), Err(TelegramError::Decode(DecodeError::UnrecognizedFrameType(0x7A)))));
        assert_eq!(d.snapshot(), before);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(t.explanations.len(), 2);
    }

    #[test]
    fn test_encrypted_without_key_is_best_effort() {
        let d = device();
        let mut t = received(short_frame(), ADDRESS, [0u8; 16]);
        let commit = d.handle_telegram(&mut t).unwrap();
        assert_eq!(commit.warnings, vec![TelegramError::MissingKey]);
        assert_eq!(commit.snapshot.total_energy_kwh, 1.0);
    }

    #[test]
    fn test_decryption_failure_aborts() {
        let d = MeterDevice::new("heating", ADDRESS, Some(vec![0u8; 16]), family(), DecryptionGate::new(Box::new(FailingCipher)));
        let count = counting(&d);
        let mut t = received(short_frame(), ADDRESS, [0u8; 16]);
        assert!(matches!(d.handle_telegram(&mut t), Err(TelegramError::DecryptionFailed(CipherError::InvalidLength))));
        assert!(d.snapshot().last_update.is_none());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[cfg(feature = "aes-ctr")]
    #[test]
    fn test_encrypted_telegram_with_key() {
        use crate::metering_wmbus::decryption::Aes128CtrDecryptor;

        let key = vec![0x42u8; 16];
        let iv = [0x07u8; 16];
        let cipher = Aes128CtrDecryptor.decrypt_ctr(&short_frame(), &key, &iv).unwrap();

        let d = MeterDevice::new("heating", ADDRESS, Some(key), family(), DecryptionGate::default());
        let mut t = received(cipher, ADDRESS, iv);
        let commit = d.handle_telegram(&mut t).unwrap();
        assert_eq!(t.content, short_frame());
        assert_eq!(commit.snapshot.total_volume_m3, 2.0);
    }

    /* Short buffers are padded with zeros instead of being rejected */
    #[test]
    fn test_truncated_frame_is_lenient() {
        let d = device();
        let mut content = short_frame();
        content.truncate(14);
        let mut t = Telegram::simulated(ADDRESS, content);
        let commit = d.handle_telegram(&mut t).unwrap();

        assert!(commit.report.is_truncated());
        assert_eq!(commit.warnings.len(), 1);
        assert_eq!(commit.snapshot.total_energy_kwh, 1.0);
        assert_eq!(commit.snapshot.total_volume_m3, 2.0);
        assert!(matches!(commit.warnings[0], TelegramError::OutOfBounds(_)));
        assert_eq!(t.explanations.len(), 5);
    }

    #[test]
    fn test_decoding_is_deterministic() {
        let d = device();
        let mut first = Telegram::simulated(ADDRESS, long_frame());
        let mut second = Telegram::simulated(ADDRESS, long_frame());
        let a = d.handle_telegram(&mut first).unwrap();
        let b = d.handle_telegram(&mut second).unwrap();
        assert_eq!(a.report, b.report);
        assert_eq!(first.explanations, second.explanations);
    }

    #[test]
    fn test_unsubscribe() {
        let d = device();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let id = d.subscribe(Arc::new(move |_: &MeterUpdate| { c.fetch_add(1, Ordering::SeqCst); }));
        assert!(d.unsubscribe(id));
        assert!(!d.unsubscribe(id));

        let mut t = Telegram::simulated(ADDRESS, short_frame());
        d.handle_telegram(&mut t).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_observer_may_subscribe_and_unsubscribe() {
        let d = Arc::new(device());
        let count = Arc::new(AtomicUsize::new(0));

        let weak = Arc::downgrade(&d);
        let c = count.clone();
        let first = d.subscribe(Arc::new(move |_: &MeterUpdate| {
            if let Some(d) = weak.upgrade() {
                let c = c.clone();
                d.subscribe(Arc::new(move |_: &MeterUpdate| { c.fetch_add(1, Ordering::SeqCst); }));
            }
        }));

        let mut t = Telegram::simulated(ADDRESS, short_frame());
        d.handle_telegram(&mut t).unwrap();
        /* Added during the notification, called from the next one on */
        assert_eq!(count.load(Ordering::SeqCst), 0);

        let weak = Arc::downgrade(&d);
        d.subscribe(Arc::new(move |_: &MeterUpdate| {
            if let Some(d) = weak.upgrade() {
                d.unsubscribe(first);
            }
        }));

        let mut t = Telegram::simulated(ADDRESS, short_frame());
        d.handle_telegram(&mut t).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let mut t = Telegram::simulated(ADDRESS, short_frame());
        d.handle_telegram(&mut t).unwrap();
        /* Two observers counting now, the first one is gone */
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_foreign_manufacturer_and_media_warn() {
        let d = device();
        let mut t = Telegram::new(short_frame(), ADDRESS, false, [0u8; 16]);
        t.manufacturer = 0x1593;
        t.device_type = 0x07;

        let commit = d.handle_telegram(&mut t).unwrap();
        assert_eq!(commit.warnings, vec![
            TelegramError::UnexpectedManufacturer("ELS".to_string()),
            TelegramError::UnexpectedMedia(0x07),
        ]);

        let mut t = received(short_frame(), ADDRESS, [0u8; 16]);
        t.encrypted = false;
        assert!(d.identity_warnings(&t).is_empty());
        assert!(d.identity_warnings(&Telegram::simulated(ADDRESS, short_frame())).is_empty());
    }

    #[tokio::test]
    async fn test_channel_subscriber() {
        let d = device();
        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        d.subscribe(channel_subscriber(tx));

        let mut t = Telegram::simulated(ADDRESS, long_frame());
        d.handle_telegram(&mut t).unwrap();

        let update = rx.recv().await.unwrap();
        assert_eq!(update.meter_name, "heating");
        assert_eq!(update.meter_type, "multical302");
        assert_eq!(update.media, "heat");
        assert_eq!(update.id, "12345678");
        assert_eq!(update.snapshot.current_power_kw, 1000.0);
    }
}
