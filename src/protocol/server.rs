use super::{
    Message, MessageKind, SessionError, SessionResult, TcpTransport, Transport, read_ciphertexts,
    read_shape, write_ciphertexts, write_shape,
};
use crate::config::{BackendConfig, SessionConfig};
use crate::crypto::errors::scales_match;
use crate::crypto::{CkksContext, CkksParams};
use crate::exec::{ExecResult, HeBackend, HeTensor, NonlinearOracle};
use crate::graph::ElementType;
use crate::handle::{CiphertextHandle, HeValue, Packing};
use crate::kernel::{NonlinearOp, checked_shape_size};
use crate::wire::{ensure_consumed, read_public_key, read_relin_key, write_params};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, info};
use std::io::Cursor;
use std::net::TcpListener;
use std::sync::Arc;

/// The evaluating party's end of a session.
///
/// Acts as the [`NonlinearOracle`] of an [`HeBackend::call`], forwarding
/// each ReLU-family batch to the client and waiting for its response.
pub struct ServerSession<T: Transport = TcpTransport> {
    transport: T,
    context: Arc<CkksContext>,
    packing: Packing,
    max_batch_elements: usize,
}

impl ServerSession<TcpTransport> {
    /// Accepts one client and performs the handshake.
    pub fn accept(
        listener: &TcpListener,
        params: CkksParams,
        config: &SessionConfig,
    ) -> SessionResult<(Self, HeBackend, HeTensor)> {
        let (stream, peer) = listener.accept()?;
        info!("client connected from {peer}");
        let transport = TcpTransport::from_stream(stream, config.timeout)?;
        Self::handshake(transport, params, config)
    }
}

impl<T: Transport> ServerSession<T> {
    /// Sends the parameters, then receives the client's evaluation keys
    /// and encrypted input. Returns the session, a backend holding the
    /// client's public keys, and the input tensor.
    pub fn handshake(
        mut transport: T,
        params: CkksParams,
        config: &SessionConfig,
    ) -> SessionResult<(Self, HeBackend, HeTensor)> {
        match Self::exchange(&mut transport, params, config) {
            Ok((context, packing, backend, input)) => {
                let session = Self {
                    transport,
                    context,
                    packing,
                    max_batch_elements: config.max_batch_elements.max(1),
                };
                Ok((session, backend, input))
            }
            Err(e) => {
                transport.close();
                Err(e)
            }
        }
    }

    fn exchange(
        transport: &mut T,
        params: CkksParams,
        config: &SessionConfig,
    ) -> SessionResult<(Arc<CkksContext>, Packing, HeBackend, HeTensor)> {
        let context = Arc::new(CkksContext::new(params.clone())?);
        let mut payload = Vec::new();
        write_params(&params, &mut payload)?;
        transport.send(&Message::new(MessageKind::Parameters, 0, payload))?;

        let keys = expect(transport, MessageKind::EvaluationKeys)?;
        let mut cursor = Cursor::new(keys.payload.as_slice());
        let public_key = read_public_key(&mut cursor, &context)?;
        let relin_key = read_relin_key(&mut cursor, &context)?;
        ensure_consumed(&cursor)?;

        let execute = expect(transport, MessageKind::Execute)?;
        let mut cursor = Cursor::new(execute.payload.as_slice());
        let packing = Packing::from_complex_flag(cursor.read_u8()? != 0);
        let code = cursor.read_u8()?;
        let element_type = ElementType::from_code(code)
            .ok_or_else(|| SessionError::Payload(format!("element type {code}")))?;
        let batch_size = cursor.read_u64::<LittleEndian>()? as usize;
        let capacity = packing.lane_capacity(context.slot_count());
        if !(1..=capacity).contains(&batch_size) {
            return Err(SessionError::Payload(format!(
                "batch size {batch_size} outside 1..={capacity}"
            )));
        }
        let shape = read_shape(&mut cursor)?;
        let declared = usize::try_from(execute.count)
            .ok()
            .and_then(|count| count.checked_mul(batch_size));
        if declared.is_none() || checked_shape_size(&shape) != declared {
            return Err(SessionError::Payload(format!(
                "shape {shape:?} does not hold {} ciphertexts of {batch_size} lanes",
                execute.count
            )));
        }
        let handles = read_ciphertexts(&mut cursor, execute.count, &context, packing)?;
        ensure_consumed(&cursor)?;
        let values = handles.into_iter().map(HeValue::Cipher).collect();
        let input = HeTensor::new(element_type, shape, batch_size, values)?;
        info!(
            "received {:?} input {:?} batched {batch_size}, {packing} packing",
            element_type,
            input.shape()
        );

        let backend = HeBackend::from_keys(
            Arc::clone(&context),
            public_key,
            relin_key,
            BackendConfig::default()
                .with_complex_packing(packing.is_complex())
                .with_seed(config.seed),
        )?;
        Ok((context, packing, backend, input))
    }

    pub fn packing(&self) -> Packing {
        self.packing
    }

    /// Sends the graph output to the client and closes the connection.
    pub fn send_result(mut self, output: &HeTensor) -> SessionResult<()> {
        let handles = cipher_handles(output)?;
        let mut payload = Vec::new();
        write_shape(output.shape(), &mut payload)?;
        write_ciphertexts(&handles, &self.context, &mut payload)?;
        let sent = self.transport.send(&Message::new(
            MessageKind::Result,
            handles.len() as u64,
            payload,
        ));
        self.transport.close();
        sent
    }

    fn round_trip(
        &mut self,
        op: NonlinearOp,
        chunk: &[CiphertextHandle],
    ) -> SessionResult<Vec<CiphertextHandle>> {
        let mut payload = Vec::new();
        let kind = match op {
            NonlinearOp::Relu => MessageKind::ReluRequest,
            NonlinearOp::BoundedRelu { alpha } => {
                payload.write_f64::<LittleEndian>(alpha)?;
                MessageKind::BoundedReluRequest
            }
        };
        write_ciphertexts(chunk, &self.context, &mut payload)?;
        self.transport
            .send(&Message::new(kind, chunk.len() as u64, payload))?;

        let response = expect(&mut self.transport, MessageKind::ReluResponse)?;
        if response.count != chunk.len() as u64 {
            return Err(SessionError::Payload(format!(
                "{} ciphertexts answered with {}",
                chunk.len(),
                response.count
            )));
        }
        let mut cursor = Cursor::new(response.payload.as_slice());
        let handles = read_ciphertexts(&mut cursor, response.count, &self.context, self.packing)?;
        ensure_consumed(&cursor)?;
        for (index, (sent, got)) in chunk.iter().zip(&handles).enumerate() {
            if got.level() != sent.level() || !scales_match(got.scale(), sent.scale()) {
                return Err(SessionError::ResponseMismatch {
                    index,
                    level: got.level(),
                    scale: got.scale(),
                });
            }
        }
        Ok(handles)
    }
}

fn expect<T: Transport>(transport: &mut T, kind: MessageKind) -> SessionResult<Message> {
    let message = transport.receive()?;
    if message.kind != kind {
        return Err(SessionError::Payload(format!(
            "expected {kind}, got {}",
            message.kind
        )));
    }
    Ok(message)
}

fn cipher_handles(tensor: &HeTensor) -> SessionResult<Vec<CiphertextHandle>> {
    tensor
        .values()
        .iter()
        .map(|v| match v {
            HeValue::Cipher(c) => Ok(c.clone()),
            HeValue::Plain(_) => Err(SessionError::Payload(
                "result holds unencrypted elements".into(),
            )),
        })
        .collect()
}

impl<T: Transport> NonlinearOracle for ServerSession<T> {
    fn evaluate(
        &mut self,
        op: NonlinearOp,
        _lanes: usize,
        batch: &[CiphertextHandle],
    ) -> ExecResult<Vec<CiphertextHandle>> {
        let mut out = Vec::with_capacity(batch.len());
        for chunk in batch.chunks(self.max_batch_elements) {
            debug!("requesting {op} for {} ciphertexts", chunk.len());
            match self.round_trip(op, chunk) {
                Ok(handles) => out.extend(handles),
                Err(e) => {
                    self.transport.close();
                    return Err(e.into());
                }
            }
        }
        Ok(out)
    }
}

impl<T: Transport> Drop for ServerSession<T> {
    fn drop(&mut self) {
        self.transport.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeySet;
    use crate::wire::{write_public_key, write_relin_key};
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    use std::cell::Cell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    struct Scripted {
        incoming: VecDeque<Message>,
        closed: Rc<Cell<bool>>,
    }

    impl Transport for Scripted {
        fn send(&mut self, _message: &Message) -> SessionResult<()> {
            Ok(())
        }

        fn receive(&mut self) -> SessionResult<Message> {
            self.incoming.pop_front().ok_or(SessionError::Closed)
        }

        fn close(&mut self) {
            self.closed.set(true);
        }

        fn is_closed(&self) -> bool {
            self.closed.get()
        }
    }

    fn evaluation_keys() -> Message {
        let context = CkksContext::new(CkksParams::toy()).unwrap();
        let keys = KeySet::generate(&context, &mut ChaCha20Rng::seed_from_u64(31)).unwrap();
        let mut payload = Vec::new();
        write_public_key(&keys.public, &context, &mut payload).unwrap();
        write_relin_key(&keys.relin, &context, &mut payload).unwrap();
        Message::new(MessageKind::EvaluationKeys, 0, payload)
    }

    fn execute(batch_size: u64, shape: &[usize], count: u64) -> Message {
        let mut payload = Vec::new();
        payload.write_u8(0).unwrap();
        payload.write_u8(ElementType::F32.code()).unwrap();
        payload.write_u64::<LittleEndian>(batch_size).unwrap();
        write_shape(shape, &mut payload).unwrap();
        Message::new(MessageKind::Execute, count, payload)
    }

    fn handshake_with(execute: Message) -> (SessionError, bool) {
        let closed = Rc::new(Cell::new(false));
        let transport = Scripted {
            incoming: VecDeque::from([evaluation_keys(), execute]),
            closed: Rc::clone(&closed),
        };
        let result =
            ServerSession::handshake(transport, CkksParams::toy(), &SessionConfig::default());
        let Err(err) = result else {
            panic!("handshake accepted a malformed Execute");
        };
        (err, closed.get())
    }

    #[test]
    fn overflowing_input_shape_is_rejected() {
        let (err, closed) = handshake_with(execute(1, &[1 << 40, 1 << 40], 0));
        assert!(matches!(err, SessionError::Payload(_)), "{err}");
        assert!(closed);
    }

    #[test]
    fn batch_size_outside_lane_capacity_is_rejected() {
        let (err, closed) = handshake_with(execute(0, &[2], 2));
        assert!(matches!(err, SessionError::Payload(_)), "{err}");
        assert!(closed);

        let (err, _) = handshake_with(execute(1 << 20, &[1 << 20], 1));
        assert!(matches!(err, SessionError::Payload(_)), "{err}");
    }

    #[test]
    fn shape_must_match_ciphertext_count() {
        let (err, closed) = handshake_with(execute(1, &[3], 5));
        assert!(matches!(err, SessionError::Payload(_)), "{err}");
        assert!(closed);
    }
}
