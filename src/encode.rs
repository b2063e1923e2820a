use bytes::{Buf, Bytes, BytesMut};
use compression_codecs::EncodeV2;
use compression_core::util::{PartialBuffer, WriteBuffer};
use http_body::{Body, Frame, SizeHint};
use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

const OUTPUT_BUFFER_SIZE: usize = 8 * 1024; // 8KB output buffer

pin_project! {
    /// A body that encodes its inner body lazily, one chunk at a time.
    pub(crate) struct EncodedBody<B> {
        #[pin]
        inner: B,
        state: EncoderState,
    }
}

/// Encoder and buffers for an actively encoded body.
struct EncoderState {
    encoder: Box<dyn EncodeV2 + Send>,
    output_buffer: Vec<u8>,
    always_flush: bool,
    phase: Phase,
    pending_trailers: Option<http::HeaderMap>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Reading data from inner body and encoding.
    Reading,
    /// Finishing the encoder after inner body is done.
    Finishing,
    /// Emitting buffered trailers.
    Trailers,
    Done,
}

impl<B> EncodedBody<B> {
    pub(crate) fn new(inner: B, encoder: Box<dyn EncodeV2 + Send>, always_flush: bool) -> Self {
        Self {
            inner,
            state: EncoderState {
                encoder,
                output_buffer: vec![0u8; OUTPUT_BUFFER_SIZE],
                always_flush,
                phase: Phase::Reading,
                pending_trailers: None,
            },
        }
    }
}

impl EncoderState {
    fn poll_encoded<B>(
        &mut self,
        cx: &mut Context<'_>,
        mut inner: Pin<&mut B>,
    ) -> Poll<Option<Result<Frame<Bytes>, io::Error>>>
    where
        B: Body,
        B::Data: Buf,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        loop {
            match self.phase {
                Phase::Done => return Poll::Ready(None),

                Phase::Trailers => {
                    self.phase = Phase::Done;
                    return Poll::Ready(self.pending_trailers.take().map(|t| Ok(Frame::trailers(t))));
                }

                Phase::Finishing => {
                    let mut output =
                        WriteBuffer::new_initialized(self.output_buffer.as_mut_slice());

                    let done = match self.encoder.finish(&mut output) {
                        Ok(done) => done,
                        Err(e) => return Poll::Ready(Some(Err(io::Error::other(e)))),
                    };
                    let written = output.written_len();

                    if done {
                        self.phase = if self.pending_trailers.is_some() {
                            Phase::Trailers
                        } else {
                            Phase::Done
                        };
                    }
                    if written > 0 {
                        let data = Bytes::copy_from_slice(&self.output_buffer[..written]);
                        return Poll::Ready(Some(Ok(Frame::data(data))));
                    }
                }

                Phase::Reading => match inner.as_mut().poll_frame(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(None) => self.phase = Phase::Finishing,
                    Poll::Ready(Some(Err(e))) => {
                        return Poll::Ready(Some(Err(io::Error::other(e.into()))));
                    }
                    Poll::Ready(Some(Ok(frame))) => match frame.into_data() {
                        Ok(mut data) => {
                            let input = data.copy_to_bytes(data.remaining());
                            let encoded = match self.encode_chunk(&input) {
                                Ok(encoded) => encoded,
                                Err(e) => return Poll::Ready(Some(Err(e))),
                            };
                            // The encoder may hold small chunks back; keep reading.
                            if !encoded.is_empty() {
                                return Poll::Ready(Some(Ok(Frame::data(encoded))));
                            }
                        }
                        Err(frame) => {
                            if let Ok(trailers) = frame.into_trailers() {
                                // Finish the encoded stream before the trailers
                                self.pending_trailers = Some(trailers);
                                self.phase = Phase::Finishing;
                            }
                        }
                    },
                },
            }
        }
    }

    /// Encodes a chunk of input data.
    fn encode_chunk(&mut self, input: &[u8]) -> io::Result<Bytes> {
        let mut all_output = BytesMut::new();
        encode_into(
            self.encoder.as_mut(),
            input,
            &mut self.output_buffer,
            &mut all_output,
        )?;

        if self.always_flush {
            loop {
                let mut output = WriteBuffer::new_initialized(self.output_buffer.as_mut_slice());
                let done = self.encoder.flush(&mut output).map_err(io::Error::other)?;
                let written = output.written_len();
                all_output.extend_from_slice(&self.output_buffer[..written]);
                if done {
                    break;
                }
            }
        }

        Ok(all_output.freeze())
    }
}

/// Feeds all of `input` to the encoder, appending whatever it emits.
fn encode_into(
    encoder: &mut (dyn EncodeV2 + Send),
    input: &[u8],
    scratch: &mut [u8],
    out: &mut BytesMut,
) -> io::Result<()> {
    let mut input_buf = PartialBuffer::new(input);

    loop {
        let mut output = WriteBuffer::new_initialized(&mut *scratch);
        let consumed_before = input_buf.written_len();

        encoder
            .encode(&mut input_buf, &mut output)
            .map_err(io::Error::other)?;

        let written = output.written_len();
        out.extend_from_slice(&scratch[..written]);

        if input_buf.written_len() >= input.len() {
            return Ok(());
        }

        // No progress either way, bail out instead of spinning
        if written == 0 && input_buf.written_len() == consumed_before {
            return Err(io::Error::other("encoder made no progress"));
        }
    }
}

/// Encodes a whole in-memory body in one go.
pub(crate) fn encode_all(mut encoder: Box<dyn EncodeV2 + Send>, input: &[u8]) -> io::Result<Bytes> {
    let mut scratch = vec![0u8; OUTPUT_BUFFER_SIZE];
    let mut out = BytesMut::with_capacity(input.len() / 2);

    encode_into(encoder.as_mut(), input, &mut scratch, &mut out)?;

    loop {
        let mut output = WriteBuffer::new_initialized(scratch.as_mut_slice());
        let done = encoder.finish(&mut output).map_err(io::Error::other)?;
        let written = output.written_len();
        out.extend_from_slice(&scratch[..written]);
        if done {
            return Ok(out.freeze());
        }
    }
}

impl<B> Body for EncodedBody<B>
where
    B: Body,
    B::Data: Buf,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        this.state.poll_encoded(cx, this.inner)
    }

    fn is_end_stream(&self) -> bool {
        self.state.phase == Phase::Done
    }

    fn size_hint(&self) -> SizeHint {
        // Encoded size is unknown
        SizeHint::default()
    }
}
