// ******************************************************************
// forward-ssdp
//    Relays SSDP multicast between network segments, forging the
//    sender address.
//
// Copyright (c) 2026 forward-ssdp contributors
//
// This program is free software; you can redistribute it and/or
// modify it under the terms of the GNU General Public License
// as published by the Free Software Foundation; either version 2
// of the License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
// ******************************************************************
//

//! The relay engine: joins N listeners to M senders through one
//! dispatcher with a fixed-window throttle.

use std::io;
use std::net::Shutdown;
use std::thread;
use std::time::Duration;

use anyhow::{ensure, Context};
use crossbeam_channel::{bounded, select, tick, Receiver};

use crate::listener::{Family, Listener, Message};
use crate::netutil::{ipv6_multicast_supported, NetInterface};
use crate::sender::Sender;

const DEFAULT_THROTTLE_WINDOW: Duration = Duration::from_millis(500);
const DEFAULT_THROTTLE_LIMIT: u64 = 250;

/// Fixed-window packet counter. The tick resets the count; no credit
/// carries over between windows. Short SSDP bursts (a device's NOTIFY
/// series, an M-SEARCH and its answers) pass untouched; only sustained
/// flooding, which on this protocol means a forwarding loop or a broken
/// device, trips it.
struct Throttle {
    limit: u64,
    count: u64,
}

impl Throttle {
    fn new(limit: u64) -> Throttle {
        Throttle { limit, count: 0 }
    }

    fn admit(&mut self) -> bool {
        self.count += 1;
        self.count <= self.limit
    }

    fn reset(&mut self) {
        self.count = 0;
    }
}

/// Owns the listener and sender sets; everything closes when the relay
/// goes away.
pub struct Relay {
    listeners: Vec<Listener>,
    senders: Vec<Sender>,
    throttle_window: Duration,
    throttle_limit: u64,
}

impl Relay {
    /// Builds a v4 listener/sender per interface, plus the v6 pair where
    /// the interface passes the IPv6 multicast probe. Any listener
    /// failure closes everything opened so far and aborts construction.
    pub fn new(ingress: &[NetInterface], egress: &[NetInterface]) -> anyhow::Result<Relay> {
        let mut listeners = Vec::new();
        for ifi in ingress {
            listeners.push(
                Listener::new(ifi, Family::V4)
                    .with_context(|| format!("listening for IPv4 SSDP on {}", ifi.name))?,
            );
            if ipv6_multicast_supported(ifi) {
                listeners.push(
                    Listener::new(ifi, Family::V6)
                        .with_context(|| format!("listening for IPv6 SSDP on {}", ifi.name))?,
                );
            }
        }

        let mut senders = Vec::new();
        for ifi in egress {
            senders.push(Sender::new(ifi, Family::V4));
            if ipv6_multicast_supported(ifi) {
                senders.push(Sender::new(ifi, Family::V6));
            }
        }

        Ok(Relay {
            listeners,
            senders,
            throttle_window: DEFAULT_THROTTLE_WINDOW,
            throttle_limit: DEFAULT_THROTTLE_LIMIT,
        })
    }

    /// Overrides the default 500 ms / 250 packet throttle.
    pub fn with_throttle(mut self, window: Duration, limit: u64) -> anyhow::Result<Relay> {
        ensure!(window > Duration::ZERO, "throttle window must be positive");
        ensure!(limit > 0, "throttle limit must be positive");
        self.throttle_window = window;
        self.throttle_limit = limit;
        Ok(self)
    }

    /// Runs every listener on its own thread and dispatches until the
    /// first listener error. On the way out every listener socket is shut
    /// down and every thread joined; nothing outlives this call.
    pub fn serve(mut self) -> anyhow::Result<()> {
        let (msg_tx, msg_rx) = bounded::<Message>(self.listeners.len() * 2);
        let (err_tx, err_rx) = bounded::<io::Error>(self.listeners.len());

        let mut closers = Vec::with_capacity(self.listeners.len());
        let mut workers = Vec::with_capacity(self.listeners.len());
        for listener in self.listeners.drain(..) {
            closers.push(
                listener
                    .shutdown_handle()
                    .context("duplicating listener socket")?,
            );
            let (msg_tx, err_tx) = (msg_tx.clone(), err_tx.clone());
            workers.push(thread::spawn(move || listener.run(&msg_tx, &err_tx)));
        }
        drop(msg_tx);
        drop(err_tx);

        let result = self.dispatch(&msg_rx, &err_rx);

        for closer in &closers {
            let _ = closer.shutdown(Shutdown::Both);
        }
        // Listeners parked on a full message channel only wake once the
        // receiving side is gone.
        drop(msg_rx);
        for worker in workers {
            let _ = worker.join();
        }

        result
    }

    fn dispatch(
        &self,
        messages: &Receiver<Message>,
        errors: &Receiver<io::Error>,
    ) -> anyhow::Result<()> {
        let ticker = tick(self.throttle_window);
        let mut throttle = Throttle::new(self.throttle_limit);

        loop {
            select! {
                recv(ticker) -> _ => throttle.reset(),
                recv(messages) -> msg => match msg {
                    Ok(msg) => {
                        if throttle.admit() {
                            self.relay(&msg);
                        } else {
                            log::warn!("too many packets per second; dropping packet");
                        }
                    }
                    // Every listener is gone; surface whatever error
                    // they left behind.
                    Err(_) => {
                        return match errors.try_recv() {
                            Ok(e) => Err(e).context("listener terminated"),
                            Err(_) => Ok(()),
                        };
                    }
                },
                recv(errors) -> err => {
                    return match err {
                        Ok(e) => Err(e).context("listener terminated"),
                        Err(_) => Ok(()),
                    };
                }
            }
        }
    }

    fn relay(&self, msg: &Message) {
        for sender in targets(&self.senders, msg) {
            if let Err(e) = sender.send(&msg.payload, msg.source.ip(), msg.source.port()) {
                log::error!("relaying packet from {}: {e}", msg.source);
            }
        }
    }
}

/// Senders eligible for a message: same family, different interface.
/// Skipping the ingress interface by name is what keeps a relayed packet
/// from echoing straight back where it came from.
fn targets<'a>(senders: &'a [Sender], msg: &'a Message) -> impl Iterator<Item = &'a Sender> {
    senders
        .iter()
        .filter(|s| s.family() == msg.family && s.interface_name() != msg.ingress)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netutil::IfAddr;
    use nix::net::if_::InterfaceFlags;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    fn test_interface(name: &str) -> NetInterface {
        NetInterface {
            name: name.to_string(),
            index: 1,
            hardware_addr: None,
            flags: InterfaceFlags::IFF_UP | InterfaceFlags::IFF_MULTICAST,
            addrs: vec![IfAddr {
                ip: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)),
                prefix_len: 24,
            }],
        }
    }

    fn message(family: Family, ingress: &str) -> Message {
        Message {
            family,
            ingress: ingress.to_string(),
            source: SocketAddr::from(([192, 168, 1, 5], 54321)),
            payload: b"X".to_vec(),
        }
    }

    fn target_names(senders: &[Sender], msg: &Message) -> Vec<String> {
        targets(senders, msg)
            .map(|s| s.interface_name().to_string())
            .collect()
    }

    #[test]
    fn routing_skips_the_ingress_interface() {
        let senders: Vec<Sender> = ["A", "B", "C"]
            .iter()
            .map(|name| Sender::new(&test_interface(name), Family::V4))
            .collect();

        let msg = message(Family::V4, "B");
        assert_eq!(target_names(&senders, &msg), ["A", "C"]);
    }

    #[test]
    fn routing_reaches_every_other_interface_exactly_once() {
        let senders: Vec<Sender> = ["A", "B", "C", "D"]
            .iter()
            .map(|name| Sender::new(&test_interface(name), Family::V4))
            .collect();

        let msg = message(Family::V4, "A");
        assert_eq!(target_names(&senders, &msg), ["B", "C", "D"]);
    }

    #[test]
    fn routing_is_family_segregated() {
        let mut senders = Vec::new();
        for name in ["A", "B"] {
            senders.push(Sender::new(&test_interface(name), Family::V4));
            senders.push(Sender::new(&test_interface(name), Family::V6));
        }

        let msg = message(Family::V6, "A");
        let chosen: Vec<(String, Family)> = targets(&senders, &msg)
            .map(|s| (s.interface_name().to_string(), s.family()))
            .collect();
        assert_eq!(chosen, [("B".to_string(), Family::V6)]);
    }

    #[test]
    fn two_interface_relay_has_a_single_target() {
        let senders = vec![
            Sender::new(&test_interface("A"), Family::V4),
            Sender::new(&test_interface("B"), Family::V4),
        ];

        assert_eq!(target_names(&senders, &message(Family::V4, "A")), ["B"]);
        assert_eq!(target_names(&senders, &message(Family::V4, "B")), ["A"]);
    }

    #[test]
    fn throttle_caps_one_window_and_resets_on_tick() {
        let mut throttle = Throttle::new(250);

        let admitted = (0..300).filter(|_| throttle.admit()).count();
        assert_eq!(admitted, 250);

        throttle.reset();
        assert!(throttle.admit(), "a fresh window admits again");
    }

    #[test]
    fn throttle_does_not_roll_credit_over() {
        let mut throttle = Throttle::new(2);

        // An idle window leaves no extra room in the next one.
        throttle.reset();
        throttle.reset();
        assert!(throttle.admit());
        assert!(throttle.admit());
        assert!(!throttle.admit());
    }

    // With no listeners every channel disconnects immediately and the
    // dispatcher winds down instead of hanging.
    #[test]
    fn serve_returns_cleanly_without_listeners() {
        let relay = Relay::new(&[], &[]).unwrap();
        assert!(relay.serve().is_ok());
    }

    #[test]
    fn throttle_config_must_be_positive() {
        let relay = Relay::new(&[], &[]).unwrap();
        assert!(relay.with_throttle(Duration::ZERO, 250).is_err());

        let relay = Relay::new(&[], &[]).unwrap();
        assert!(relay.with_throttle(Duration::from_millis(500), 0).is_err());

        let relay = Relay::new(&[], &[]).unwrap();
        assert!(relay
            .with_throttle(Duration::from_millis(500), 250)
            .is_ok());
    }
}
