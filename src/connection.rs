use crate::prelude::*;

use async_trait::async_trait;
use tokio::net::UdpSocket;

use crate::frame::{self, ModbusResponse};

/// Total tries for one command before the cycle is given up.
const SEND_ATTEMPTS: usize = 3;
const RECV_BUFFER_SIZE: usize = 1024;

/// Identity the inverter reports during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InverterInfo {
    pub ip: String,
    pub mac: String,
    pub serial: u64,
}

impl InverterInfo {
    fn parse(data: &[u8]) -> Result<Self> {
        let line = std::str::from_utf8(data)
            .map_err(|err| anyhow!("handshake reply is not ASCII: {:?}: {}", data, err))?;
        let line = line.trim_end_matches(['\r', '\n']);

        let mut fields = line.split(',');
        let (Some(ip), Some(mac), Some(serial)) = (fields.next(), fields.next(), fields.next())
        else {
            bail!("handshake reply {:?} is not ip,mac,serial", line);
        };
        let serial = serial
            .parse()
            .map_err(|err| anyhow!("handshake serial {:?} is not a number: {}", serial, err))?;

        Ok(Self {
            ip: ip.to_string(),
            mac: mac.to_string(),
            serial,
        })
    }
}

/// Write access to the inverter's register space. The daily reset issues its
/// set-time writes through this seam, so tests can record them.
#[async_trait]
pub trait RegisterWriter {
    async fn write_registers(&mut self, start_register: u16, values: &[u16]) -> Result<String>;
}

/// One UDP conversation with the inverter's wifi stick, from handshake to
/// sign-off. Owns the socket for exactly one poll cycle.
pub struct Session {
    socket: UdpSocket,
    config: config::Inverter,
    info: Option<InverterInfo>,
    signed_off: bool,
}

impl Session {
    pub async fn connect(config: &config::Inverter) -> Result<Self> {
        info!("Connect to {}:{}...", config.host(), config.port());
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect((config.host(), config.port())).await?;

        let mut session = Self {
            socket,
            config: config.clone(),
            info: None,
            signed_off: false,
        };
        let info = session.handshake().await?;
        info!(
            "Connected to inverter {} at {} ({})",
            info.serial, info.ip, info.mac
        );
        session.info = Some(info);
        Ok(session)
    }

    pub fn info(&self) -> &InverterInfo {
        self.info.as_ref().expect("session is connected")
    }

    /// Init exchange: the identity request, then the literal `+ok` ack.
    async fn handshake(&self) -> Result<InverterInfo> {
        let reply = self
            .exchange(self.config.init_command().as_bytes())
            .await?;
        self.send(b"+ok").await?;
        InverterInfo::parse(&reply)
    }

    /// Send one datagram, then give the stick's embedded stack a moment to
    /// breathe before anything else hits it.
    async fn send(&self, payload: &[u8]) -> Result<()> {
        trace!("send: {:?}", payload);
        self.socket
            .send(payload)
            .await
            .map_err(|err| anyhow!("send to {} failed: {}", self.config.host(), err))?;
        tokio::time::sleep(self.config.pause()).await;
        Ok(())
    }

    /// `None` means the receive timed out; socket errors are hard failures.
    async fn recv(&self) -> Result<Option<Vec<u8>>> {
        let mut buffer = [0u8; RECV_BUFFER_SIZE];
        match tokio::time::timeout(self.config.timeout(), self.socket.recv(&mut buffer)).await {
            Ok(Ok(len)) => {
                trace!("recv: {:?}", &buffer[..len]);
                Ok(Some(buffer[..len].to_vec()))
            }
            Ok(Err(err)) => Err(anyhow!("recv from {} failed: {}", self.config.host(), err)),
            Err(_) => Ok(None),
        }
    }

    async fn exchange(&self, payload: &[u8]) -> Result<Vec<u8>> {
        self.send(payload).await?;
        self.recv()
            .await?
            .ok_or_else(|| ReadError::Timeout { attempts: 1 }.into())
    }

    /// Send an AT command and return the raw reply. A timed-out attempt is
    /// retried after re-running the handshake: the stick drops its session
    /// state without telling anyone.
    pub async fn at_command(&mut self, command: &str) -> Result<Vec<u8>> {
        if command.starts_with("AT+") {
            bail!("Command {:?} must not carry the AT+ prefix", command);
        }
        if command.ends_with('\n') {
            bail!("Command {:?} must not carry a line ending", command);
        }
        let line = format!("AT+{command}\n");

        for attempt in 1..=SEND_ATTEMPTS {
            self.send(line.as_bytes()).await?;
            match self.recv().await? {
                Some(data) => return Ok(data),
                None => {
                    warn!(
                        "No reply from {} (attempt {}/{})",
                        self.config.host(),
                        attempt,
                        SEND_ATTEMPTS
                    );
                    if attempt < SEND_ATTEMPTS {
                        if let Err(err) = self.handshake().await {
                            warn!("Re-init failed: {:#}", err);
                        }
                    }
                }
            }
        }
        Err(ReadError::Timeout {
            attempts: SEND_ATTEMPTS,
        }
        .into())
    }

    /// AT command whose reply is unwrapped to the data after the `=`.
    pub async fn cleaned_at_command(&mut self, command: &str) -> Result<String> {
        let data = self.at_command(command).await?;
        Ok(frame::parse_response(&data)?.data)
    }

    /// Read `length` registers starting at `start_register`.
    pub async fn read_registers(
        &mut self,
        start_register: u16,
        length: u16,
    ) -> Result<ModbusResponse> {
        let command = frame::to_at_command(&frame::build_read_frame(start_register, length));
        let data = self.cleaned_at_command(&command).await?;
        Ok(frame::parse_modbus_response(&data)?)
    }

    /// Best-effort quit so the stick releases the session right away. Never
    /// escalates: the device is about to be left alone either way.
    pub async fn sign_off(mut self) {
        debug!("Signing off with AT+Q");
        if let Err(err) = self.send(b"AT+Q\n").await {
            debug!("Sign-off failed: {:#}", err);
        }
        self.signed_off = true;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // backstop for cancelled cycles; a UDP send never blocks
        if !self.signed_off {
            let _ = self.socket.try_send(b"AT+Q\n");
        }
    }
}

#[async_trait]
impl RegisterWriter for Session {
    /// Write `values` into consecutive registers at `start_register` and
    /// return the raw reply data. The echo is not validated; this device
    /// answers writes with an unrelated status blob.
    async fn write_registers(&mut self, start_register: u16, values: &[u16]) -> Result<String> {
        let command = frame::to_at_command(&frame::build_write_frame(start_register, values));
        self.cleaned_at_command(&command).await
    }
}
