// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! S7 报文编解码 (ISO-on-TCP)
//!
//! 报文结构: TPKT(4) | COTP | S7 header | parameters | data
//! 只实现数据块 (DB) 的字节读写所需的最小子集。

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{LinkError, LinkResult};

pub const TPKT_VERSION: u8 = 0x03;
pub const TPKT_HEADER_LEN: usize = 4;

/// COTP 数据报头 (长度 2, DT, EOT)
const COTP_DT: [u8; 3] = [0x02, 0xF0, 0x80];
const COTP_CR: u8 = 0xE0;
const COTP_CC: u8 = 0xD0;

const S7_PROTOCOL_ID: u8 = 0x32;
const ROSCTR_JOB: u8 = 0x01;
const ROSCTR_ACK: u8 = 0x02;
const ROSCTR_ACK_DATA: u8 = 0x03;

const FUNC_SETUP: u8 = 0xF0;
const FUNC_READ: u8 = 0x04;
const FUNC_WRITE: u8 = 0x05;

/// 数据块区域
const AREA_DB: u8 = 0x84;
/// 请求项传输类型: BYTE
const TS_BYTE: u8 = 0x02;
/// 数据部分传输类型: BYTE/WORD/DWORD, 长度以 bit 计
const DATA_TS_BYTE: u8 = 0x04;
/// 数据项成功
pub const RETURN_OK: u8 = 0xFF;

pub const LOCAL_TSAP: u16 = 0x0100;
pub const DEFAULT_PDU_SIZE: u16 = 480;

/// 读写请求的固定开销 (header + params + data header)
pub const READ_OVERHEAD: usize = 18;
pub const WRITE_OVERHEAD: usize = 28;

/// 远端 TSAP: 0x01 (PG 通信) + rack/slot
pub fn remote_tsap(rack: u16, slot: u16) -> u16 {
    0x0100 | (rack * 0x20 + slot)
}

fn tpkt(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(TPKT_HEADER_LEN + payload.len());
    buf.put_u8(TPKT_VERSION);
    buf.put_u8(0x00);
    buf.put_u16((TPKT_HEADER_LEN + payload.len()) as u16);
    buf.put_slice(payload);
    buf.freeze()
}

/// TPKT 头 → 整个报文长度
pub fn parse_tpkt_header(header: &[u8]) -> LinkResult<usize> {
    if header.len() < TPKT_HEADER_LEN || header[0] != TPKT_VERSION {
        return Err(LinkError::Protocol(format!("无效的 TPKT 头: {header:02X?}")));
    }
    let len = u16::from_be_bytes([header[2], header[3]]) as usize;
    if len < TPKT_HEADER_LEN + 3 {
        return Err(LinkError::Protocol(format!("TPKT 长度过短: {len}")));
    }
    Ok(len)
}

// ========== COTP ==========

pub fn encode_connection_request(local_tsap: u16, remote_tsap: u16) -> Bytes {
    let mut cotp = BytesMut::with_capacity(18);
    cotp.put_u8(17); // 长度 (不含本字节)
    cotp.put_u8(COTP_CR);
    cotp.put_u16(0x0000); // dst ref
    cotp.put_u16(0x0001); // src ref
    cotp.put_u8(0x00); // class 0
    cotp.put_slice(&[0xC0, 0x01, 0x0A]); // TPDU 1024
    cotp.put_slice(&[0xC1, 0x02]);
    cotp.put_u16(local_tsap);
    cotp.put_slice(&[0xC2, 0x02]);
    cotp.put_u16(remote_tsap);
    tpkt(&cotp)
}

/// 连接确认 (payload 为去掉 TPKT 头的部分)
pub fn parse_connection_confirm(payload: &[u8]) -> LinkResult<()> {
    match payload.get(1) {
        Some(&COTP_CC) => Ok(()),
        Some(other) => Err(LinkError::Protocol(format!(
            "COTP 连接被拒绝 (PDU type 0x{other:02X})"
        ))),
        None => Err(LinkError::Protocol("COTP 确认报文为空".to_string())),
    }
}

// ========== S7 ==========

fn s7_job(pdu_ref: u16, params: &[u8], data: &[u8]) -> Bytes {
    let mut payload = BytesMut::with_capacity(COTP_DT.len() + 10 + params.len() + data.len());
    payload.put_slice(&COTP_DT);
    payload.put_u8(S7_PROTOCOL_ID);
    payload.put_u8(ROSCTR_JOB);
    payload.put_u16(0x0000);
    payload.put_u16(pdu_ref);
    payload.put_u16(params.len() as u16);
    payload.put_u16(data.len() as u16);
    payload.put_slice(params);
    payload.put_slice(data);
    tpkt(&payload)
}

pub fn encode_setup_communication(pdu_ref: u16, pdu_size: u16) -> Bytes {
    let mut params = BytesMut::with_capacity(8);
    params.put_u8(FUNC_SETUP);
    params.put_u8(0x00);
    params.put_u16(1); // max AmQ calling
    params.put_u16(1); // max AmQ called
    params.put_u16(pdu_size);
    s7_job(pdu_ref, &params, &[])
}

/// DB 字节访问的请求项 (12 字节)
fn put_db_item(buf: &mut BytesMut, db: u16, start: u32, len: usize) {
    buf.put_u8(0x12); // variable specification
    buf.put_u8(0x0A); // 后续长度
    buf.put_u8(0x10); // syntax id: S7ANY
    buf.put_u8(TS_BYTE);
    buf.put_u16(len as u16);
    buf.put_u16(db);
    buf.put_u8(AREA_DB);
    // 位地址 = 字节偏移 * 8, 3 字节
    let bit_addr = start * 8;
    buf.put_u8((bit_addr >> 16) as u8);
    buf.put_u16((bit_addr & 0xFFFF) as u16);
}

pub fn encode_read_request(pdu_ref: u16, db: u16, start: u32, len: usize) -> Bytes {
    let mut params = BytesMut::with_capacity(14);
    params.put_u8(FUNC_READ);
    params.put_u8(1); // item count
    put_db_item(&mut params, db, start, len);
    s7_job(pdu_ref, &params, &[])
}

pub fn encode_write_request(pdu_ref: u16, db: u16, start: u32, data: &[u8]) -> Bytes {
    let mut params = BytesMut::with_capacity(14);
    params.put_u8(FUNC_WRITE);
    params.put_u8(1);
    put_db_item(&mut params, db, start, data.len());

    let mut item = BytesMut::with_capacity(4 + data.len());
    item.put_u8(0x00);
    item.put_u8(DATA_TS_BYTE);
    item.put_u16((data.len() * 8) as u16);
    item.put_slice(data);
    s7_job(pdu_ref, &params, &item)
}

/// 已解析的应答
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckPdu {
    pub pdu_ref: u16,
    pub params: Bytes,
    pub data: Bytes,
}

/// 解析 S7 应答 (payload 为去掉 TPKT 头的部分)
pub fn parse_ack(payload: &[u8]) -> LinkResult<AckPdu> {
    if payload.len() < COTP_DT.len() + 12 || payload[1] != COTP_DT[1] {
        return Err(LinkError::Protocol(format!(
            "应答报文过短或非 COTP DT ({} 字节)",
            payload.len()
        )));
    }
    let mut buf = &payload[COTP_DT.len()..];

    if buf.get_u8() != S7_PROTOCOL_ID {
        return Err(LinkError::Protocol("非 S7 报文".to_string()));
    }
    let rosctr = buf.get_u8();
    if rosctr != ROSCTR_ACK && rosctr != ROSCTR_ACK_DATA {
        return Err(LinkError::Protocol(format!("意外的 ROSCTR 0x{rosctr:02X}")));
    }
    buf.advance(2);
    let pdu_ref = buf.get_u16();
    let param_len = buf.get_u16() as usize;
    let data_len = buf.get_u16() as usize;
    let class = buf.get_u8();
    let code = buf.get_u8();
    if class != 0 || code != 0 {
        return Err(LinkError::Rejected { class, code });
    }

    if buf.remaining() < param_len + data_len {
        return Err(LinkError::Protocol(format!(
            "应答长度不符 (需要 {}, 实际 {})",
            param_len + data_len,
            buf.remaining()
        )));
    }
    let params = Bytes::copy_from_slice(&buf[..param_len]);
    let data = Bytes::copy_from_slice(&buf[param_len..param_len + data_len]);

    Ok(AckPdu {
        pdu_ref,
        params,
        data,
    })
}

/// 协商后的 PDU 长度
pub fn parse_setup_response(ack: &AckPdu) -> LinkResult<u16> {
    let p = &ack.params;
    if p.len() < 8 || p[0] != FUNC_SETUP {
        return Err(LinkError::Protocol("通信建立应答无效".to_string()));
    }
    Ok(u16::from_be_bytes([p[6], p[7]]))
}

fn check_function(ack: &AckPdu, function: u8) -> LinkResult<()> {
    match ack.params.first() {
        Some(&f) if f == function => Ok(()),
        _ => Err(LinkError::Protocol(format!(
            "应答功能码不符 (期望 0x{function:02X})"
        ))),
    }
}

/// 读应答 → 数据字节
pub fn parse_read_response(ack: &AckPdu, expected_len: usize) -> LinkResult<Vec<u8>> {
    check_function(ack, FUNC_READ)?;
    let mut data = &ack.data[..];
    if data.remaining() < 4 {
        return Err(LinkError::Protocol("读应答缺少数据项".to_string()));
    }
    let return_code = data.get_u8();
    if return_code != RETURN_OK {
        return Err(LinkError::ItemFailed(return_code));
    }
    let transport = data.get_u8();
    let raw_len = data.get_u16() as usize;
    let len = match transport {
        // 长度以 bit 计
        0x03 | 0x04 | 0x05 => raw_len / 8,
        _ => raw_len,
    };
    if len != expected_len || data.remaining() < len {
        return Err(LinkError::Protocol(format!(
            "读应答长度不符 (期望 {expected_len}, 实际 {len})"
        )));
    }
    Ok(data[..len].to_vec())
}

pub fn parse_write_response(ack: &AckPdu) -> LinkResult<()> {
    check_function(ack, FUNC_WRITE)?;
    match ack.data.first() {
        Some(&RETURN_OK) => Ok(()),
        Some(&code) => Err(LinkError::ItemFailed(code)),
        None => Err(LinkError::Protocol("写应答缺少返回码".to_string())),
    }
}
