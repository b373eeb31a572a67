// Outbound delivery of rendered reports.
//
// `DeliveryDriver` is the seam between the reporting pipeline and the mail
// transport. Rate limiting lives in `PacedDriver`, which wraps any driver and
// enforces a minimum interval between consecutive sends.
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::config::SmtpSettings;
use crate::error::DeliveryError;
use crate::util::path_component;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailKind {
    Store,
    Management,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
    pub kind: MailKind,
    pub to: String,
    pub subject: String,
    pub body_html: String,
}

pub trait DeliveryDriver {
    fn send(&mut self, message: &EmailMessage) -> Result<(), DeliveryError>;
}

impl<D: DeliveryDriver + ?Sized> DeliveryDriver for Box<D> {
    fn send(&mut self, message: &EmailMessage) -> Result<(), DeliveryError> {
        (**self).send(message)
    }
}

/// Inclusive bounds for the random gap between two sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingBounds {
    pub min: Duration,
    pub max: Duration,
}

impl PacingBounds {
    pub const ZERO: PacingBounds = PacingBounds {
        min: Duration::ZERO,
        max: Duration::ZERO,
    };

    pub fn from_secs(min: u64, max: u64) -> Self {
        PacingBounds {
            min: Duration::from_secs(min),
            max: Duration::from_secs(max),
        }
    }

    fn sample<R: Rng>(&self, rng: &mut R) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let millis = rng.random_range(self.min.as_millis() as u64..=self.max.as_millis() as u64);
        Duration::from_millis(millis)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingPolicy {
    pub store: PacingBounds,
    pub management: PacingBounds,
}

impl PacingPolicy {
    pub fn immediate() -> Self {
        PacingPolicy {
            store: PacingBounds::ZERO,
            management: PacingBounds::ZERO,
        }
    }

    fn bounds(&self, kind: MailKind) -> PacingBounds {
        match kind {
            MailKind::Store => self.store,
            MailKind::Management => self.management,
        }
    }
}

pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Enforces the transport's rate limit: after each send (successful or not)
/// a gap is drawn from the bounds for that kind of mail, and the next send
/// waits until the gap has elapsed. Nothing waits after the last send.
pub struct PacedDriver<D, C = SystemClock> {
    inner: D,
    policy: PacingPolicy,
    clock: C,
    rng: StdRng,
    next_allowed: Option<Instant>,
}

impl<D: DeliveryDriver> PacedDriver<D, SystemClock> {
    pub fn new(inner: D, policy: PacingPolicy) -> Self {
        Self::with_clock(inner, policy, SystemClock, StdRng::from_os_rng())
    }
}

impl<D: DeliveryDriver, C: Clock> PacedDriver<D, C> {
    pub fn with_clock(inner: D, policy: PacingPolicy, clock: C, rng: StdRng) -> Self {
        Self {
            inner,
            policy,
            clock,
            rng,
            next_allowed: None,
        }
    }
}

impl<D: DeliveryDriver, C: Clock> DeliveryDriver for PacedDriver<D, C> {
    fn send(&mut self, message: &EmailMessage) -> Result<(), DeliveryError> {
        if let Some(next) = self.next_allowed {
            let now = self.clock.now();
            if next > now {
                let wait = next - now;
                debug!(wait_ms = wait.as_millis() as u64, "pacing before next send");
                self.clock.sleep(wait);
            }
        }
        let result = self.inner.send(message);
        let gap = self.policy.bounds(message.kind).sample(&mut self.rng);
        self.next_allowed = Some(self.clock.now() + gap);
        result
    }
}

/// SMTP session held for the whole run. The pooled connection is closed when
/// the driver is dropped.
pub struct SmtpDriver {
    transport: SmtpTransport,
    from: Mailbox,
}

impl SmtpDriver {
    pub fn connect(settings: &SmtpSettings) -> Result<Self, DeliveryError> {
        let from: Mailbox = settings
            .sender
            .parse()
            .map_err(|e: lettre::address::AddressError| DeliveryError::Address {
                address: settings.sender.clone(),
                reason: e.to_string(),
            })?;
        let creds = Credentials::new(settings.username.clone(), settings.password.clone());
        let transport = SmtpTransport::starttls_relay(&settings.host)
            .map_err(|e| DeliveryError::Transport(e.to_string()))?
            .port(settings.port)
            .credentials(creds)
            .build();

        let reachable = transport
            .test_connection()
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        if !reachable {
            return Err(DeliveryError::Transport(format!(
                "could not connect to {}:{}",
                settings.host, settings.port
            )));
        }
        info!(host = %settings.host, port = settings.port, "SMTP session open");

        Ok(Self { transport, from })
    }
}

impl DeliveryDriver for SmtpDriver {
    fn send(&mut self, message: &EmailMessage) -> Result<(), DeliveryError> {
        let to: Mailbox = message
            .to
            .parse()
            .map_err(|e: lettre::address::AddressError| DeliveryError::Address {
                address: message.to.clone(),
                reason: e.to_string(),
            })?;
        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(&message.subject)
            .header(ContentType::TEXT_HTML)
            .body(message.body_html.clone())
            .map_err(|e| DeliveryError::Build(e.to_string()))?;

        self.transport
            .send(&email)
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        Ok(())
    }
}

/// Dry-run driver: every message becomes an HTML file in `dir`.
pub struct OutboxDriver {
    dir: PathBuf,
    sequence: usize,
}

impl OutboxDriver {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, DeliveryError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, sequence: 0 })
    }
}

impl DeliveryDriver for OutboxDriver {
    fn send(&mut self, message: &EmailMessage) -> Result<(), DeliveryError> {
        self.sequence += 1;
        let kind = match message.kind {
            MailKind::Store => "store",
            MailKind::Management => "management",
        };
        let file = self.dir.join(format!(
            "{:03}_{}_{}.html",
            self.sequence,
            kind,
            path_component(&message.to)
        ));
        let contents = format!(
            "<!-- To: {} -->\n<!-- Subject: {} -->\n{}",
            message.to.replace("--", "- -"),
            message.subject.replace("--", "- -"),
            message.body_html
        );
        fs::write(&file, contents)?;
        info!(to = %message.to, file = %file.display(), "message written to outbox");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    #[derive(Clone)]
    struct FakeClock {
        now: Rc<Cell<Instant>>,
        sleeps: Rc<RefCell<Vec<Duration>>>,
    }

    impl FakeClock {
        fn new() -> Self {
            Self {
                now: Rc::new(Cell::new(Instant::now())),
                sleeps: Rc::new(RefCell::new(Vec::new())),
            }
        }

        fn advance(&self, d: Duration) {
            self.now.set(self.now.get() + d);
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> Instant {
            self.now.get()
        }

        fn sleep(&self, duration: Duration) {
            self.sleeps.borrow_mut().push(duration);
            self.advance(duration);
        }
    }

    #[derive(Default)]
    struct Recorder {
        sent: Vec<EmailMessage>,
    }

    impl DeliveryDriver for Recorder {
        fn send(&mut self, message: &EmailMessage) -> Result<(), DeliveryError> {
            self.sent.push(message.clone());
            Ok(())
        }
    }

    fn message(kind: MailKind) -> EmailMessage {
        EmailMessage {
            kind,
            to: "ana@example.com".to_string(),
            subject: "One Page store Centro on 02/01/2024".to_string(),
            body_html: "<p>hi</p>".to_string(),
        }
    }

    fn policy() -> PacingPolicy {
        PacingPolicy {
            store: PacingBounds::from_secs(40, 68),
            management: PacingBounds::from_secs(45, 45),
        }
    }

    #[test]
    fn first_send_is_immediate_and_later_sends_wait_within_bounds() {
        let clock = FakeClock::new();
        let mut driver = PacedDriver::with_clock(
            Recorder::default(),
            policy(),
            clock.clone(),
            StdRng::seed_from_u64(7),
        );
        driver.send(&message(MailKind::Store)).unwrap();
        assert!(clock.sleeps.borrow().is_empty());

        driver.send(&message(MailKind::Store)).unwrap();
        driver.send(&message(MailKind::Management)).unwrap();
        driver.send(&message(MailKind::Store)).unwrap();

        let sleeps = clock.sleeps.borrow();
        assert_eq!(sleeps.len(), 3);
        for wait in &sleeps[..2] {
            assert!(*wait >= Duration::from_secs(40) && *wait <= Duration::from_secs(68));
        }
        // gap after a management mail comes from the management bounds
        assert_eq!(sleeps[2], Duration::from_secs(45));
        assert_eq!(driver.inner.sent.len(), 4);
    }

    #[test]
    fn time_already_elapsed_counts_toward_the_gap() {
        let clock = FakeClock::new();
        let mut driver = PacedDriver::with_clock(
            Recorder::default(),
            policy(),
            clock.clone(),
            StdRng::seed_from_u64(1),
        );
        driver.send(&message(MailKind::Management)).unwrap();
        clock.advance(Duration::from_secs(30));
        driver.send(&message(MailKind::Store)).unwrap();
        assert_eq!(clock.sleeps.borrow().as_slice(), &[Duration::from_secs(15)]);

        clock.advance(Duration::from_secs(100));
        driver.send(&message(MailKind::Store)).unwrap();
        assert_eq!(clock.sleeps.borrow().len(), 1);
    }

    #[test]
    fn failed_sends_still_pace_the_next_attempt() {
        struct Failing;
        impl DeliveryDriver for Failing {
            fn send(&mut self, _: &EmailMessage) -> Result<(), DeliveryError> {
                Err(DeliveryError::Transport("421 try later".to_string()))
            }
        }
        let clock = FakeClock::new();
        let mut driver = PacedDriver::with_clock(Failing, policy(), clock.clone(), StdRng::seed_from_u64(3));
        assert!(driver.send(&message(MailKind::Management)).is_err());
        assert!(driver.send(&message(MailKind::Store)).is_err());
        assert_eq!(clock.sleeps.borrow().as_slice(), &[Duration::from_secs(45)]);
    }

    #[test]
    fn outbox_writes_one_file_per_message() {
        let dir = tempfile::tempdir().unwrap();
        let mut driver = OutboxDriver::new(dir.path().join("outbox")).unwrap();
        driver.send(&message(MailKind::Store)).unwrap();
        driver.send(&message(MailKind::Management)).unwrap();

        let mut names: Vec<String> = fs::read_dir(dir.path().join("outbox"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "001_store_ana@example.com.html".to_string(),
                "002_management_ana@example.com.html".to_string()
            ]
        );
        let written = fs::read_to_string(dir.path().join("outbox").join(&names[0])).unwrap();
        assert!(written.contains("Subject: One Page store Centro on 02/01/2024"));
        assert!(written.ends_with("<p>hi</p>"));
    }
}
