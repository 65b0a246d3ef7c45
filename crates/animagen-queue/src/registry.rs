//! One queue per resource class.

use std::collections::HashMap;

use animagen_models::ResourceClass;

use crate::config::ConcurrencyConfig;
use crate::queue::{QueueStats, TaskQueue};

/// The three resource class queues, constructed together so worker counts
/// come from one [`ConcurrencyConfig`].
pub struct TaskQueues<O> {
    llm: TaskQueue<O>,
    image: TaskQueue<O>,
    video: TaskQueue<O>,
}

impl<O> Clone for TaskQueues<O> {
    fn clone(&self) -> Self {
        Self {
            llm: self.llm.clone(),
            image: self.image.clone(),
            video: self.video.clone(),
        }
    }
}

impl<O> TaskQueues<O>
where
    O: Clone + Send + Sync + 'static,
{
    pub fn new(config: &ConcurrencyConfig) -> Self {
        Self {
            llm: TaskQueue::new(ResourceClass::Llm, config.queue_config(ResourceClass::Llm)),
            image: TaskQueue::new(
                ResourceClass::Image,
                config.queue_config(ResourceClass::Image),
            ),
            video: TaskQueue::new(
                ResourceClass::Video,
                config.queue_config(ResourceClass::Video),
            ),
        }
    }

    pub fn get(&self, class: ResourceClass) -> &TaskQueue<O> {
        match class {
            ResourceClass::Llm => &self.llm,
            ResourceClass::Image => &self.image,
            ResourceClass::Video => &self.video,
        }
    }

    /// Stats for every class, keyed by class.
    pub fn stats(&self) -> HashMap<ResourceClass, QueueStats> {
        ResourceClass::ALL
            .iter()
            .map(|&class| (class, self.get(class).stats()))
            .collect()
    }

    pub fn shutdown_all(&self) {
        for &class in ResourceClass::ALL.iter() {
            self.get(class).shutdown();
        }
    }
}
