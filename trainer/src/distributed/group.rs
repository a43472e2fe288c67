use std::{borrow::Cow, io, time::Duration};

use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg, Payload},
};
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
    runtime::{Builder, Runtime},
    time,
};

use crate::{Result, TrainErr, config::DistConfig};

const DUPLEX_BUFFER: usize = 64 * 1024;

type BoxRead = Box<dyn AsyncRead + Unpin + Send>;
type BoxWrite = Box<dyn AsyncWrite + Unpin + Send>;

/// One end of a connection between the coordinator and a member.
struct Link {
    rx: OnoReceiver<BoxRead>,
    tx: OnoSender<BoxWrite>,
    buf: Vec<u32>,
}

impl Link {
    fn new<R, W>(rx: R, tx: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (rx, tx) = comms::channel(Box::new(rx) as BoxRead, Box::new(tx) as BoxWrite);
        Self {
            rx,
            tx,
            buf: Vec::new(),
        }
    }

    async fn recv(&mut self) -> io::Result<Msg<'_>> {
        self.rx.recv_into(&mut self.buf).await
    }
}

enum Role {
    Solo,
    /// Rank 0, holding a link to every other rank in rank order.
    Coordinator { members: Vec<Link> },
    Member { coordinator: Link },
}

/// The set of processes training together.
///
/// Collective operations are synchronous barriers: every rank must call them in the same order.
/// They run on a runtime owned by the group, so they can be called from plain threads.
pub struct ProcessGroup {
    rank: usize,
    world_size: usize,
    runtime: Runtime,
    role: Mutex<Role>,
}

impl ProcessGroup {
    /// Joins or creates the process group.
    ///
    /// Rank 0 binds `config.dist_url` and waits for every other rank to join, the rest connect to
    /// it retrying while it isn't up yet.
    ///
    /// # Arguments
    /// * `rank` - This process' rank.
    /// * `world_size` - The amount of processes in the group.
    /// * `group_name` - The name every member has to agree on.
    /// * `config` - The transport configuration.
    ///
    /// # Returns
    /// The group or a `DistributedInit` error if it couldn't be formed.
    pub fn init(
        rank: usize,
        world_size: usize,
        group_name: &str,
        config: &DistConfig,
    ) -> Result<Self> {
        if rank >= world_size {
            return Err(TrainErr::DistributedInit(format!(
                "rank {rank} is out of range for a group of {world_size}"
            )));
        }

        if world_size == 1 {
            return Self::solo();
        }

        if config.dist_backend != "tcp" {
            return Err(TrainErr::DistributedInit(format!(
                "unsupported backend {:?}",
                config.dist_backend
            )));
        }

        let runtime = Self::runtime()?;
        let role = if rank == 0 {
            runtime.block_on(Self::accept_members(group_name, world_size, config.addr()))?
        } else {
            runtime.block_on(Self::join(group_name, rank, world_size, config))?
        };

        info!(rank = rank, world_size = world_size; "joined process group {group_name:?}");

        Ok(Self {
            rank,
            world_size,
            runtime,
            role: Mutex::new(role),
        })
    }

    /// A group with a single process, every collective is a no-op.
    pub fn solo() -> Result<Self> {
        Self::with_role(0, 1, Role::Solo)
    }

    /// Creates every rank of an in process group connected through in memory pipes.
    ///
    /// # Returns
    /// The groups in rank order, each meant to be driven from its own thread.
    pub fn local(world_size: usize) -> Result<Vec<Self>> {
        if world_size == 0 {
            return Err(TrainErr::DistributedInit(
                "a group needs at least one process".to_string(),
            ));
        }

        if world_size == 1 {
            return Ok(vec![Self::solo()?]);
        }

        let mut coordinator_links = Vec::with_capacity(world_size - 1);
        let mut members = Vec::with_capacity(world_size - 1);

        for rank in 1..world_size {
            let (near, far) = tokio::io::duplex(DUPLEX_BUFFER);

            let (rx, tx) = tokio::io::split(near);
            coordinator_links.push(Link::new(rx, tx));

            let (rx, tx) = tokio::io::split(far);
            let coordinator = Link::new(rx, tx);
            members.push(Self::with_role(rank, world_size, Role::Member { coordinator })?);
        }

        let coordinator = Self::with_role(
            0,
            world_size,
            Role::Coordinator {
                members: coordinator_links,
            },
        )?;

        Ok(std::iter::once(coordinator).chain(members).collect())
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    /// Replaces `buf` with its element wise average across every process.
    ///
    /// The coordinator sums the contributions in rank order and broadcasts the result, so every
    /// rank ends up with bit identical values.
    pub fn all_reduce(&self, buf: &mut [f32]) -> Result<()> {
        let mut role = self.role.lock();

        match &mut *role {
            Role::Solo => Ok(()),
            Role::Coordinator { members } => self
                .runtime
                .block_on(Self::reduce_as_coordinator(members, buf, self.world_size)),
            Role::Member { coordinator } => self
                .runtime
                .block_on(Self::reduce_as_member(coordinator, buf)),
        }
    }

    /// Averages a scalar metric across every process.
    pub fn reduce_scalar(&self, value: f32) -> Result<f32> {
        let mut buf = [value];
        self.all_reduce(&mut buf)?;
        Ok(buf[0])
    }

    /// Leaves the group, the coordinator waits until every member has left.
    pub fn leave(&self) -> Result<()> {
        let mut role = self.role.lock();

        match &mut *role {
            Role::Solo => Ok(()),
            Role::Coordinator { members } => self.runtime.block_on(async {
                for (i, link) in members.iter_mut().enumerate() {
                    match link.recv().await.map_err(TrainErr::Communication)? {
                        Msg::Control(Command::Disconnect) => debug!(rank = i + 1; "member left"),
                        msg => warn!(rank = i + 1; "expected a disconnect, got {}", msg.kind()),
                    }
                }

                Ok::<_, TrainErr>(())
            }),
            Role::Member { coordinator } => self.runtime.block_on(async {
                let msg = Msg::Control(Command::Disconnect);
                coordinator
                    .tx
                    .send(&msg)
                    .await
                    .map_err(TrainErr::Communication)
            }),
        }
    }

    fn with_role(rank: usize, world_size: usize, role: Role) -> Result<Self> {
        Ok(Self {
            rank,
            world_size,
            runtime: Self::runtime()?,
            role: Mutex::new(role),
        })
    }

    fn runtime() -> Result<Runtime> {
        Ok(Builder::new_current_thread().enable_all().build()?)
    }

    async fn reduce_as_coordinator(
        members: &mut [Link],
        buf: &mut [f32],
        world_size: usize,
    ) -> Result<()> {
        let mut sum = buf.to_vec();

        for (i, link) in members.iter_mut().enumerate() {
            let rank = i + 1;
            match link.recv().await.map_err(TrainErr::Communication)? {
                Msg::Data(Payload::Gradient(values)) if values.len() == sum.len() => {
                    sum.iter_mut().zip(values).for_each(|(s, v)| *s += v);
                }
                Msg::Data(Payload::Gradient(values)) => {
                    return Err(TrainErr::ShapeMismatch(format!(
                        "rank {rank} contributed {} values, expected {}",
                        values.len(),
                        sum.len()
                    )));
                }
                msg => {
                    return Err(TrainErr::Communication(io::Error::other(format!(
                        "expected a gradient from rank {rank}, got {}",
                        msg.kind()
                    ))));
                }
            }
        }

        let scale = world_size as f32;
        sum.iter_mut().for_each(|s| *s /= scale);

        let reduced = Msg::Data(Payload::Reduced(&sum));
        for link in members.iter_mut() {
            link.tx
                .send(&reduced)
                .await
                .map_err(TrainErr::Communication)?;
        }

        buf.copy_from_slice(&sum);
        Ok(())
    }

    async fn reduce_as_member(coordinator: &mut Link, buf: &mut [f32]) -> Result<()> {
        let msg = Msg::Data(Payload::Gradient(buf));
        coordinator
            .tx
            .send(&msg)
            .await
            .map_err(TrainErr::Communication)?;

        match coordinator.recv().await.map_err(TrainErr::Communication)? {
            Msg::Data(Payload::Reduced(values)) if values.len() == buf.len() => {
                buf.copy_from_slice(values);
                Ok(())
            }
            Msg::Data(Payload::Reduced(values)) => Err(TrainErr::ShapeMismatch(format!(
                "received {} reduced values, expected {}",
                values.len(),
                buf.len()
            ))),
            msg => Err(TrainErr::Communication(io::Error::other(format!(
                "expected the reduced values, got {}",
                msg.kind()
            )))),
        }
    }

    async fn accept_members(group_name: &str, world_size: usize, addr: &str) -> Result<Role> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TrainErr::DistributedInit(format!("couldn't bind {addr}: {e}")))?;
        info!("waiting for {} member(s) at {addr}", world_size - 1);

        let mut slots: Vec<Option<Link>> = (1..world_size).map(|_| None).collect();

        for _ in 1..world_size {
            let (stream, peer) = listener
                .accept()
                .await
                .map_err(|e| TrainErr::DistributedInit(e.to_string()))?;

            let (rx, tx) = stream.into_split();
            let mut link = Link::new(rx, tx);
            let rank = Self::admit(&mut link, group_name, world_size, &slots).await?;

            debug!(rank = rank; "member joined from {peer}");
            slots[rank - 1] = Some(link);
        }

        let mut members: Vec<Link> = slots.into_iter().flatten().collect();
        let welcome = Msg::Control(Command::Welcome { world_size });

        for link in &mut members {
            link.tx
                .send(&welcome)
                .await
                .map_err(|e| TrainErr::DistributedInit(e.to_string()))?;
        }

        Ok(Role::Coordinator { members })
    }

    /// Reads a member's join request, telling it why if it's rejected.
    async fn admit(
        link: &mut Link,
        group_name: &str,
        world_size: usize,
        slots: &[Option<Link>],
    ) -> Result<usize> {
        let msg = link
            .rx
            .recv_into(&mut link.buf)
            .await
            .map_err(|e| TrainErr::DistributedInit(e.to_string()))?;

        let reason = match msg {
            Msg::Control(Command::Join {
                group_name: name,
                rank,
                world_size: size,
            }) => {
                if name != group_name {
                    format!("group name {name:?} doesn't match {group_name:?}")
                } else if size != world_size {
                    format!("world size {size} doesn't match {world_size}")
                } else if rank == 0 || rank >= world_size {
                    format!("rank {rank} is out of range")
                } else if slots[rank - 1].is_some() {
                    format!("rank {rank} joined twice")
                } else {
                    return Ok(rank);
                }
            }
            msg => format!("expected a join request, got {}", msg.kind()),
        };

        let reply = Msg::Err(Cow::Borrowed(&reason));
        if let Err(e) = link.tx.send(&reply).await {
            warn!("couldn't notify the rejected member: {e}");
        }

        Err(TrainErr::DistributedInit(reason))
    }

    async fn join(
        group_name: &str,
        rank: usize,
        world_size: usize,
        config: &DistConfig,
    ) -> Result<Role> {
        let interval = Duration::from_millis(config.retry_interval_ms);
        let stream = Self::connect(config.addr(), config.connect_retries, interval).await?;

        let (rx, tx) = stream.into_split();
        let mut coordinator = Link::new(rx, tx);

        let join = Msg::Control(Command::Join {
            group_name: group_name.to_string(),
            rank,
            world_size,
        });
        coordinator
            .tx
            .send(&join)
            .await
            .map_err(|e| TrainErr::DistributedInit(e.to_string()))?;

        let reply = coordinator
            .recv()
            .await
            .map_err(|e| TrainErr::DistributedInit(e.to_string()))?;

        match reply {
            Msg::Control(Command::Welcome { world_size: size }) if size == world_size => {}
            Msg::Err(reason) => {
                return Err(TrainErr::DistributedInit(format!(
                    "the coordinator rejected rank {rank}: {reason}"
                )));
            }
            msg => {
                return Err(TrainErr::DistributedInit(format!(
                    "expected a welcome, got {}",
                    msg.kind()
                )));
            }
        }

        Ok(Role::Member { coordinator })
    }

    async fn connect(addr: &str, retries: usize, interval: Duration) -> Result<TcpStream> {
        let mut attempt = 0;

        loop {
            match TcpStream::connect(addr).await {
                Ok(stream) => return Ok(stream),
                Err(e) if attempt < retries => {
                    attempt += 1;
                    debug!(attempt = attempt; "coordinator at {addr} unreachable: {e}");
                    time::sleep(interval).await;
                }
                Err(e) => {
                    return Err(TrainErr::DistributedInit(format!(
                        "couldn't reach {addr} after {attempt} retries: {e}"
                    )));
                }
            }
        }
    }
}
