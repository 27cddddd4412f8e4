#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;

use deye_bridge::connection::RegisterWriter;
use deye_bridge::decoder::{CellValue, ParserKind};
use deye_bridge::definitions::Parameter;
use deye_bridge::frame;
use deye_bridge::inverter::{InverterValue, ValueKind};

pub struct Factory;

impl Factory {
    pub fn read_out(name: &str, value: CellValue) -> InverterValue {
        InverterValue {
            kind: ValueKind::ReadOut,
            name: name.to_string(),
            value,
            device_class: "energy".to_string(),
            state_class: Some("measurement".to_string()),
            unit: "kWh".to_string(),
        }
    }

    pub fn parameter(name: &str, start_register: u16, scale: f64) -> Parameter {
        Parameter {
            start_register,
            length: 1,
            group: "test".to_string(),
            name: name.to_string(),
            device_class: "voltage".to_string(),
            state_class: Some("measurement".to_string()),
            unit: "V".to_string(),
            scale,
            offset: None,
            lookup: None,
            parser: ParserKind::Single,
        }
    }

    pub fn inverter_config(port: u16, timeout: u64) -> deye_bridge::config::Inverter {
        serde_yaml::from_str(&format!(
            "host: 127.0.0.1\nport: {port}\nmodel: test\npause_ms: 1\ntimeout: {timeout}"
        ))
        .unwrap()
    }
}

/// Records register writes instead of sending them anywhere.
#[derive(Default)]
pub struct MockWriter {
    pub writes: Vec<(u16, Vec<u16>)>,
}

#[async_trait]
impl RegisterWriter for MockWriter {
    async fn write_registers(&mut self, start_register: u16, values: &[u16]) -> Result<String> {
        self.writes.push((start_register, values.to_vec()));
        Ok("+ok".to_string())
    }
}

pub const FAKE_SERIAL: u64 = 123456789;

/// Wrap a register payload the way the device echoes it back: CRC-trailed
/// hex inside `+ok=...`, with 0x10 framing bytes after every hex pair.
pub fn device_reply(payload: &[u8]) -> Vec<u8> {
    let mut body = vec![frame::SLAVE_ID, frame::READ_FUNCTION, payload.len() as u8];
    body.extend_from_slice(payload);
    let crc = frame::crc16(&body).to_le_bytes();
    body.extend_from_slice(&crc);

    let mut reply = b"+ok=".to_vec();
    for byte in body {
        reply.extend_from_slice(hex::encode_upper([byte]).as_bytes());
        reply.push(0x10);
    }
    reply.extend_from_slice(b"\r\n");
    reply
}

/// Behaves like the inverter's wifi stick on a local UDP socket:
/// answers the handshake, serves mapped `INVDATA` reads and exits on `AT+Q`.
pub struct FakeDevice {
    pub socket: UdpSocket,
    pub reads: HashMap<Vec<u8>, Vec<u8>>,
    pub drop_next_reads: usize,
    pub handshakes: Arc<AtomicUsize>,
}

impl FakeDevice {
    pub async fn bind() -> Self {
        Self {
            socket: UdpSocket::bind("127.0.0.1:0").await.unwrap(),
            reads: HashMap::new(),
            drop_next_reads: 0,
            handshakes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn port(&self) -> u16 {
        self.socket.local_addr().unwrap().port()
    }

    /// Serve `payload` for a read of `length` registers at `start_register`.
    pub fn serve_read(&mut self, start_register: u16, length: u16, payload: &[u8]) {
        let command = format!(
            "AT+{}\n",
            frame::to_at_command(&frame::build_read_frame(start_register, length))
        );
        self.reads
            .insert(command.into_bytes(), device_reply(payload));
    }

    /// Serve a literal reply line for a read, e.g. `+ok=no data\r\n`.
    pub fn serve_read_raw(&mut self, start_register: u16, length: u16, reply: &[u8]) {
        let command = format!(
            "AT+{}\n",
            frame::to_at_command(&frame::build_read_frame(start_register, length))
        );
        self.reads.insert(command.into_bytes(), reply.to_vec());
    }

    pub async fn run(mut self) -> Result<()> {
        let mut buf = [0u8; 1024];
        loop {
            let (len, peer) = self.socket.recv_from(&mut buf).await?;
            let message = &buf[..len];

            if message == b"WIFIKIT-214028-READ" {
                self.handshakes.fetch_add(1, Ordering::SeqCst);
                self.socket
                    .send_to(format!("192.168.1.60,AABBCCDDEEFF,{FAKE_SERIAL}").as_bytes(), peer)
                    .await?;
            } else if message == b"+ok" {
                // handshake ack, nothing to answer
            } else if message == b"AT+Q\n" {
                return Ok(());
            } else if let Some(reply) = self.reads.get(message) {
                if self.drop_next_reads > 0 {
                    self.drop_next_reads -= 1;
                    continue;
                }
                self.socket.send_to(reply, peer).await?;
            } else {
                anyhow::bail!("fake device got unexpected message: {:?}", message);
            }
        }
    }
}
