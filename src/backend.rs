// src/backend.rs

use crate::config::{IPBUS_TIMEOUT_MS, MAX_READS_PER_PACKET, MAX_UDP_PACKET};
use crate::error::{HwError, Result};
use crate::hardware::Device;
use crate::ipbus::{decode_read_reply, encode_reads, first_transaction_id, transaction_id};

use std::io::ErrorKind;
use std::net::{ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};

/// Accès en lecture aux registres d'un périphérique
pub trait RegisterBus: Send {
    /// Lit un mot brut par adresse, dans l'ordre demandé
    fn read(&mut self, addresses: &[u32]) -> Result<Vec<u32>>;
}

/// Cible IPbus 2.0 sur UDP
pub struct UdpBus {
    socket: UdpSocket,
    target: String,
    timeout: Duration,
    // Identifiant de la prochaine transaction émise
    next_tid: u16,
}

impl UdpBus {
    pub fn connect(target: &str, timeout: Duration) -> Result<Self> {
        let addr = target
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| HwError::UnsupportedUri(format!("cannot resolve {}", target)))?;

        let bind = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind)?;
        socket.connect(addr)?;
        socket.set_read_timeout(Some(timeout))?;

        log::info!("Cible IPbus {} ({})", target, addr);
        Ok(Self {
            socket,
            target: target.to_string(),
            timeout,
            next_tid: 0,
        })
    }

    /// Jette les datagrammes déjà en attente (réponses arrivées après un timeout)
    fn drain_pending(&self) -> Result<()> {
        let mut buf = [0u8; MAX_UDP_PACKET];
        self.socket.set_nonblocking(true)?;
        loop {
            match self.socket.recv(&mut buf) {
                Ok(n) => log::debug!("{}: réponse tardive de {} octets ignorée", self.target, n),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::debug!("{}: {}", self.target, e);
                    break;
                }
            }
        }
        self.socket.set_nonblocking(false)?;
        Ok(())
    }

    /// Attend la réponse dont la première transaction porte `first_tid`
    fn recv_reply<'a>(&self, first_tid: u16, buf: &'a mut [u8]) -> Result<&'a [u8]> {
        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(HwError::protocol(format!(
                    "no reply from {}: timed out",
                    self.target
                )));
            }
            self.socket.set_read_timeout(Some(remaining))?;

            let n = self.socket.recv(buf).map_err(|e| {
                HwError::protocol(format!("no reply from {}: {}", self.target, e))
            })?;
            match first_transaction_id(&buf[..n]) {
                Some(tid) if tid == first_tid => return Ok(&buf[..n]),
                other => log::debug!(
                    "{}: réponse à la transaction {:?} ignorée (attendu {})",
                    self.target,
                    other,
                    first_tid
                ),
            }
        }
    }
}

impl RegisterBus for UdpBus {
    fn read(&mut self, addresses: &[u32]) -> Result<Vec<u32>> {
        let mut values = Vec::with_capacity(addresses.len());
        let mut buf = [0u8; MAX_UDP_PACKET];

        for chunk in addresses.chunks(MAX_READS_PER_PACKET) {
            self.drain_pending()?;

            // Paquet id 0 : pas de suivi de fiabilité côté cible, les
            // identifiants de transaction distinguent les requêtes
            let first_tid = self.next_tid;
            self.next_tid = transaction_id(first_tid, chunk.len());

            let request = encode_reads(0, first_tid, chunk);
            self.socket.send(&request)?;

            let reply = self.recv_reply(first_tid, &mut buf)?;
            values.extend(decode_read_reply(0, first_tid, reply, chunk.len())?);
        }

        Ok(values)
    }
}

/// Ouvre le bus correspondant à l'URI d'une connexion
pub fn open_bus(uri: &str) -> Result<Box<dyn RegisterBus>> {
    match uri.split_once("://") {
        Some(("ipbusudp-2.0", target)) => {
            let target = target.trim_end_matches('/');
            let bus = UdpBus::connect(target, Duration::from_millis(IPBUS_TIMEOUT_MS))?;
            Ok(Box::new(bus))
        }
        _ => Err(HwError::UnsupportedUri(uri.to_string())),
    }
}

/// Lit tous les registres interrogeables d'un périphérique et met à jour ses valeurs.
///
/// En cas d'erreur les valeurs précédentes sont effacées et l'erreur est
/// conservée dans `device.status`.
pub fn read_device(bus: &mut dyn RegisterBus, device: &mut Device) -> Result<()> {
    let mut registers = device.root.registers_mut();
    let addresses: Vec<u32> = registers.iter().map(|n| n.address).collect();

    match bus.read(&addresses) {
        Ok(raw) => {
            for (node, value) in registers.iter_mut().zip(raw) {
                node.value = Some(node.apply_mask(value));
            }
            device.status = None;
            Ok(())
        }
        Err(e) => {
            for node in registers.iter_mut() {
                node.value = None;
            }
            device.status = Some(e.to_string());
            Err(e)
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::hardware::tests::fixture;
    use crate::hardware::HardwareStruct;
    use crate::ipbus::encode_read_reply;

    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::thread;

    /// Bus en mémoire : adresse -> valeur, avec compteur de lectures
    #[derive(Clone, Default)]
    pub(crate) struct MemoryBus {
        pub regs: Arc<Mutex<HashMap<u32, u32>>>,
        pub reads: Arc<Mutex<usize>>,
    }

    impl RegisterBus for MemoryBus {
        fn read(&mut self, addresses: &[u32]) -> Result<Vec<u32>> {
            *self.reads.lock().unwrap() += 1;
            let regs = self.regs.lock().unwrap();
            addresses
                .iter()
                .map(|a| {
                    regs.get(a)
                        .copied()
                        .ok_or_else(|| HwError::protocol(format!("bus error at 0x{:x}", a)))
                })
                .collect()
        }
    }

    /// Cible IPbus factice sur la boucle locale
    fn fake_target(regs: HashMap<u32, u32>, packets: usize) -> String {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = socket.local_addr().unwrap().to_string();
        thread::spawn(move || {
            let mut buf = [0u8; MAX_UDP_PACKET];
            for _ in 0..packets {
                let (n, peer) = socket.recv_from(&mut buf).unwrap();
                let reply = encode_read_reply(&buf[..n], |a| regs.get(&a).copied());
                socket.send_to(&reply, peer).unwrap();
            }
        });
        addr
    }

    #[test]
    fn udp_bus_reads_from_target() {
        let regs = HashMap::from([(0x0, 0xcafe), (0x1, 0x1234), (0x102, 42)]);
        let addr = fake_target(regs, 1);

        let mut bus = open_bus(&format!("ipbusudp-2.0://{}", addr)).unwrap();
        assert_eq!(bus.read(&[0x102, 0x0]).unwrap(), vec![42, 0xcafe]);
    }

    #[test]
    fn udp_bus_splits_large_reads() {
        let regs: HashMap<u32, u32> = (0..100).map(|a| (a, a + 1)).collect();
        let addr = fake_target(regs, 2);

        let mut bus = UdpBus::connect(&addr, Duration::from_millis(500)).unwrap();
        let addresses: Vec<u32> = (0..100).collect();
        let values = bus.read(&addresses).unwrap();
        assert_eq!(values.len(), 100);
        assert_eq!(values[99], 100);
    }

    #[test]
    fn silent_target_times_out() {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = socket.local_addr().unwrap().to_string();
        let mut bus = UdpBus::connect(&addr, Duration::from_millis(50)).unwrap();
        assert!(bus.read(&[0]).is_err());
        drop(socket);
    }

    /// Cible qui répond en retard au premier paquet, puis normalement
    fn slow_first_reply_target(regs: HashMap<u32, u32>, delay: Duration) -> String {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let addr = socket.local_addr().unwrap().to_string();
        thread::spawn(move || {
            let mut buf = [0u8; MAX_UDP_PACKET];
            let mut first = true;
            while let Ok((n, peer)) = socket.recv_from(&mut buf) {
                if first {
                    thread::sleep(delay);
                    first = false;
                }
                let reply = encode_read_reply(&buf[..n], |a| regs.get(&a).copied());
                if socket.send_to(&reply, peer).is_err() {
                    break;
                }
            }
        });
        addr
    }

    #[test]
    fn late_reply_is_not_taken_for_the_next_request() {
        let regs: HashMap<u32, u32> = (0..100).map(|a| (a, a + 1000)).collect();
        let addr = slow_first_reply_target(regs, Duration::from_millis(150));

        let mut bus = UdpBus::connect(&addr, Duration::from_millis(50)).unwrap();
        let addresses: Vec<u32> = (0..100).collect();
        assert!(bus.read(&addresses).is_err());

        let mut succeeded = false;
        for _ in 0..5 {
            if let Ok(values) = bus.read(&addresses) {
                assert_eq!(values.len(), 100);
                assert_eq!(values[0], 1000);
                assert_eq!(values[64], 1064);
                assert_eq!(values[99], 1099);
                succeeded = true;
                break;
            }
            thread::sleep(Duration::from_millis(100));
        }
        assert!(succeeded);
    }

    #[test]
    fn reply_with_other_transaction_ids_is_skipped() {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = socket.local_addr().unwrap().to_string();
        thread::spawn(move || {
            let mut buf = [0u8; MAX_UDP_PACKET];
            let (n, peer) = socket.recv_from(&mut buf).unwrap();
            let request = buf[..n].to_vec();
            let tid = first_transaction_id(&request).unwrap();
            let addresses: Vec<u32> = request[4..]
                .chunks_exact(8)
                .map(|c| u32::from_be_bytes([c[4], c[5], c[6], c[7]]))
                .collect();

            // Réponse à une autre requête, puis la bonne
            let other = encode_reads(0, transaction_id(tid, 0x800), &addresses);
            socket
                .send_to(&encode_read_reply(&other, |_| Some(0xdead)), peer)
                .unwrap();
            socket
                .send_to(&encode_read_reply(&request, |a| Some(a + 1)), peer)
                .unwrap();
        });

        let mut bus = UdpBus::connect(&addr, Duration::from_millis(500)).unwrap();
        assert_eq!(bus.read(&[4, 5]).unwrap(), vec![5, 6]);
    }

    #[test]
    fn unknown_scheme_is_unsupported() {
        assert!(matches!(
            open_bus("chtcp-2.0://host:10203"),
            Err(HwError::UnsupportedUri(_))
        ));
        assert!(open_bus("no-scheme").is_err());
    }

    #[test]
    fn read_device_applies_masks_and_records_errors() {
        let (_dir, conn) = fixture("ipbusudp-2.0://127.0.0.1:1");
        let mut hw = HardwareStruct::from_connection_file(&conn).unwrap();
        let device = &mut hw.devices[0];

        let mut bus = MemoryBus::default();
        bus.regs
            .lock()
            .unwrap()
            .extend([(0x0, 7), (0x1, 0xab00), (0x102, 3)]);

        read_device(&mut bus, device).unwrap();
        assert_eq!(device.root.find("CSR.ctrl").unwrap().value, Some(7));
        assert_eq!(device.root.find("CSR.stat").unwrap().value, Some(0xab));
        assert_eq!(device.root.find("SUB.id").unwrap().value, Some(3));
        assert!(device.status.is_none());

        bus.regs.lock().unwrap().remove(&0x102);
        assert!(read_device(&mut bus, device).is_err());
        assert_eq!(device.root.find("CSR.ctrl").unwrap().value, None);
        assert!(device.status.as_deref().unwrap().contains("0x102"));
    }
}
