// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! S7 客户端 (TCP 102 端口)

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info};

use super::s7::{self, AckPdu};
use super::{BlockClient, LinkError, LinkResult};
use crate::config::LinkConfig;

pub struct S7Client {
    address: String,
    port: u16,
    rack: u16,
    slot: u16,
    timeout: Duration,
    stream: Option<TcpStream>,
    pdu_size: usize,
    pdu_ref: u16,
}

impl S7Client {
    pub fn new(config: &LinkConfig) -> Self {
        Self {
            address: config.address.clone(),
            port: config.port,
            rack: config.rack,
            slot: config.slot,
            timeout: config.io_timeout(),
            stream: None,
            pdu_size: s7::DEFAULT_PDU_SIZE as usize,
            pdu_ref: 0,
        }
    }

    /// 协商后的 PDU 长度
    pub fn pdu_size(&self) -> usize {
        self.pdu_size
    }

    fn resolve(&self) -> LinkResult<SocketAddr> {
        (self.address.as_str(), self.port)
            .to_socket_addrs()
            .map_err(LinkError::Io)?
            .next()
            .ok_or_else(|| LinkError::Protocol(format!("无法解析地址: {}", self.address)))
    }

    fn next_ref(&mut self) -> u16 {
        self.pdu_ref = self.pdu_ref.wrapping_add(1);
        self.pdu_ref
    }

    /// 发送一个报文并读回一个完整 TPKT, 返回去掉 TPKT 头的 payload
    fn exchange(&mut self, frame: &[u8]) -> LinkResult<Vec<u8>> {
        let stream = self.stream.as_mut().ok_or(LinkError::NotConnected)?;
        stream.write_all(frame).map_err(LinkError::from_io)?;

        let mut header = [0u8; s7::TPKT_HEADER_LEN];
        stream.read_exact(&mut header).map_err(LinkError::from_io)?;
        let total = s7::parse_tpkt_header(&header)?;

        let mut payload = vec![0u8; total - s7::TPKT_HEADER_LEN];
        stream.read_exact(&mut payload).map_err(LinkError::from_io)?;
        Ok(payload)
    }

    fn job(&mut self, frame: &[u8], pdu_ref: u16) -> LinkResult<AckPdu> {
        let payload = self.exchange(frame)?;
        let ack = s7::parse_ack(&payload)?;
        if ack.pdu_ref != pdu_ref {
            return Err(LinkError::Protocol(format!(
                "PDU 序号不符 (期望 {pdu_ref}, 实际 {})",
                ack.pdu_ref
            )));
        }
        Ok(ack)
    }

    fn handshake(&mut self) -> LinkResult<()> {
        // 1. COTP 连接
        let cr =
            s7::encode_connection_request(s7::LOCAL_TSAP, s7::remote_tsap(self.rack, self.slot));
        let cc = self.exchange(&cr)?;
        s7::parse_connection_confirm(&cc)?;

        // 2. S7 通信建立, 协商 PDU
        let pdu_ref = self.next_ref();
        let setup = s7::encode_setup_communication(pdu_ref, s7::DEFAULT_PDU_SIZE);
        let ack = self.job(&setup, pdu_ref)?;
        self.pdu_size = s7::parse_setup_response(&ack)? as usize;
        debug!("📐 PDU 长度: {}", self.pdu_size);
        Ok(())
    }

    fn check_size(&self, len: usize, overhead: usize) -> LinkResult<()> {
        let limit = self.pdu_size.saturating_sub(overhead);
        if len > limit {
            return Err(LinkError::PduTooLarge {
                requested: len,
                limit,
            });
        }
        Ok(())
    }
}

impl BlockClient for S7Client {
    fn connect(&mut self) -> LinkResult<()> {
        self.disconnect();

        let addr = self.resolve()?;
        let stream = TcpStream::connect_timeout(&addr, self.timeout).map_err(LinkError::from_io)?;
        stream
            .set_read_timeout(Some(self.timeout))
            .map_err(LinkError::Io)?;
        stream
            .set_write_timeout(Some(self.timeout))
            .map_err(LinkError::Io)?;
        stream.set_nodelay(true).map_err(LinkError::Io)?;
        self.stream = Some(stream);

        if let Err(e) = self.handshake() {
            self.disconnect();
            return Err(e);
        }
        info!(
            "🔌 S7 会话建立: {} (rack={}, slot={})",
            addr, self.rack, self.slot
        );
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn db_read(&mut self, db: u16, start: u32, len: usize) -> LinkResult<Vec<u8>> {
        self.check_size(len, s7::READ_OVERHEAD)?;
        let pdu_ref = self.next_ref();
        let frame = s7::encode_read_request(pdu_ref, db, start, len);
        let ack = self.job(&frame, pdu_ref)?;
        s7::parse_read_response(&ack, len)
    }

    fn db_write(&mut self, db: u16, start: u32, data: &[u8]) -> LinkResult<()> {
        self.check_size(data.len(), s7::WRITE_OVERHEAD)?;
        let pdu_ref = self.next_ref();
        let frame = s7::encode_write_request(pdu_ref, db, start, data);
        let ack = self.job(&frame, pdu_ref)?;
        s7::parse_write_response(&ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
        let mut header = [0u8; 4];
        stream.read_exact(&mut header).unwrap();
        let len = u16::from_be_bytes([header[2], header[3]]) as usize;
        let mut body = vec![0u8; len - 4];
        stream.read_exact(&mut body).unwrap();
        body
    }

    fn send_ack(stream: &mut TcpStream, pdu_ref: [u8; 2], params: &[u8], data: &[u8]) {
        let mut s7 = vec![0x02, 0xF0, 0x80, 0x32, 0x03, 0x00, 0x00, pdu_ref[0], pdu_ref[1]];
        s7.extend_from_slice(&(params.len() as u16).to_be_bytes());
        s7.extend_from_slice(&(data.len() as u16).to_be_bytes());
        s7.extend_from_slice(&[0x00, 0x00]);
        s7.extend_from_slice(params);
        s7.extend_from_slice(data);
        let mut frame = vec![0x03, 0x00];
        frame.extend_from_slice(&((s7.len() + 4) as u16).to_be_bytes());
        frame.extend_from_slice(&s7);
        stream.write_all(&frame).unwrap();
    }

    /// 最小 PLC 模拟: 握手 → 一次写 → 一次读
    #[test]
    fn test_handshake_write_read() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let plc = thread::spawn(move || {
            let (mut s, _) = listener.accept().unwrap();

            // COTP CR → CC
            let cr = read_frame(&mut s);
            assert_eq!(cr[1], 0xE0);
            s.write_all(&[0x03, 0x00, 0x00, 0x0B, 0x06, 0xD0, 0x00, 0x01, 0x00, 0x01, 0x00])
                .unwrap();

            // setup → PDU 240
            let setup = read_frame(&mut s);
            send_ack(
                &mut s,
                [setup[7], setup[8]],
                &[0xF0, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0xF0],
                &[],
            );

            // write
            let write = read_frame(&mut s);
            assert_eq!(write[13], 0x05);
            let written = write[write.len() - 2..].to_vec();
            send_ack(&mut s, [write[7], write[8]], &[0x05, 0x01], &[0xFF]);

            // read
            let read = read_frame(&mut s);
            assert_eq!(read[13], 0x04);
            send_ack(&mut s, [read[7], read[8]], &[0x04, 0x01], &[0xFF, 0x04, 0x00, 0x08, 0x01]);

            written
        });

        let config = LinkConfig {
            address: "127.0.0.1".to_string(),
            port,
            ..LinkConfig::default()
        };
        let mut client = S7Client::new(&config);
        client.connect().unwrap();
        assert!(client.is_connected());
        assert_eq!(client.pdu_size(), 240);

        client.db_write(17, 2, &[0x00, 0x03]).unwrap();
        assert_eq!(client.db_read(17, 16, 1).unwrap(), vec![0x01]);

        client.disconnect();
        assert!(!client.is_connected());
        assert_eq!(plc.join().unwrap(), vec![0x00, 0x03]);
    }

    #[test]
    fn test_not_connected() {
        let mut client = S7Client::new(&LinkConfig::default());
        assert!(matches!(
            client.db_write(17, 0, &[1]),
            Err(LinkError::NotConnected)
        ));
    }

    #[test]
    fn test_pdu_limit() {
        let mut client = S7Client::new(&LinkConfig::default());
        let big = vec![0u8; 1000];
        assert!(matches!(
            client.db_write(17, 0, &big),
            Err(LinkError::PduTooLarge { .. })
        ));
    }
}
