//! Basic usage example for the WARPNet wire protocol.

use bytes::BytesMut;
use wn_wire::{Buffer, CmdMessage, Response, TransportHeader, DEFAULT_CHUNK_SIZE};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== WARPNet Wire Protocol Example ===\n");

    // 1. Build a command behind a transport header
    println!("1. Encoding a command...");
    let mut header = TransportHeader::new(250, 1);
    let command = CmdMessage::with_args(0x0000_0007, &[1, 2, 3])?;
    let payload = command.to_bytes();

    header.length = payload.len() as u16;
    header.response_required();
    header.increment(1);

    let mut datagram = BytesMut::new();
    header.encode(&mut datagram);
    datagram.extend_from_slice(&payload);
    println!("   Datagram size: {} bytes (seq {})", datagram.len(), header.seq_num);

    // 2. Decode it back
    println!("\n2. Decoding the command...");
    let decoded = TransportHeader::decode(&datagram)?;
    let message = Response::decode(&datagram[12..])?;
    println!("   Header: {} -> {}", decoded.src_id, decoded.dest_id);
    println!("   Command {:#010x} args {:?}", message.command, message.args());

    // 3. Split a buffer into chunks and reassemble it out of order
    println!("\n3. Chunking a 5000 byte buffer...");
    let source = Buffer::from_bytes(4, 0, &[0x42u8; 5000]);
    let chunks = source.encode_chunks(0x0000_0006, DEFAULT_CHUNK_SIZE);
    println!("   Split into {} chunks", chunks.len());

    let mut target = Buffer::new(4, 0, 5000);
    for chunk in chunks.iter().rev() {
        target.add_data(chunk);
    }
    println!(
        "   Reassembled {}/{} bytes, complete: {}",
        target.received(),
        target.size(),
        target.is_complete()
    );
    assert_eq!(target.bytes(), source.bytes());

    println!("\n=== Example completed successfully! ===");
    Ok(())
}
